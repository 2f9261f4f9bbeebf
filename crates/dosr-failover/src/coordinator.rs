//! Failover coordinator.
//!
//! Three entry points:
//!
//! - [`Engine::handle_peer_death`]: a peer was confirmed dead locally (probe
//!   expiry, write error, disconnect). If this node is its hot standby, it
//!   takes over and tells its own dependents; otherwise the peer is simply
//!   retired.
//! - [`Engine::self_fail`]: this node believes it is unreachable. It tells
//!   its first fail-to target to take over and its dependents to redirect.
//! - [`Engine::receive_failure_notice`]: another node reports that `from`
//!   failed over to `to`.
//!
//! Every path ends with the failed peer removed from all role sets, the
//! connection table and the probe set, and appended to the dead ledger. The
//! ledger makes all three paths idempotent.

use std::time::Instant;

use dosr_types::{PeerAddr, PeerId};
use dosr_wire::Message;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::service::Service;
use crate::transport::Transport;

// ============================================================================
// Dead Ledger
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadPeer {
    pub addr: PeerAddr,
    pub peer: PeerId,
    pub declared_at: Instant,
    /// True if this node took over for the peer.
    pub was_failover_target: bool,
}

/// Append-only record of retired peers.
///
/// Nothing re-admits a peer from here yet; the ledger only prevents a peer
/// from being processed twice.
#[derive(Debug, Default)]
pub struct DeadLedger {
    entries: Vec<DeadPeer>,
}

impl DeadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: DeadPeer) {
        self.entries.push(entry);
    }

    pub fn contains_peer(&self, peer: PeerId) -> bool {
        self.entries.iter().any(|e| e.peer == peer)
    }

    pub fn contains_addr(&self, addr: &PeerAddr) -> bool {
        self.entries.iter().any(|e| &e.addr == addr)
    }

    pub fn get(&self, peer: PeerId) -> Option<&DeadPeer> {
        self.entries.iter().find(|e| e.peer == peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeadPeer> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of [`Engine::handle_peer_death`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathOutcome {
    /// The peer was already in the dead ledger (or is this node).
    AlreadyDead,
    /// This node was the peer's standby and took over.
    TookOver,
    /// The peer was retired without a takeover.
    Removed,
}

/// Result of [`Engine::receive_failure_notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeOutcome {
    /// The failed peer was already dead here.
    Stale,
    /// The notice named this node as failed.
    SelfFailed,
    /// This node was the failed peer's standby and took over.
    TookOver,
    /// Traffic for the failed peer now goes to the new one.
    Redirected,
}

impl<T: Transport, S: Service> Engine<T, S> {
    /// Handles a peer confirmed dead. Idempotent.
    pub fn handle_peer_death(&mut self, peer: PeerId, now: Instant) -> DeathOutcome {
        if peer.is_self() {
            warn!("refusing to declare the local node dead as a peer");
            return DeathOutcome::AlreadyDead;
        }
        if self.identity.is_provisional(peer) {
            debug!(%peer, "unidentified connection gone");
            self.forget_provisional(peer);
            return DeathOutcome::Removed;
        }
        if self.dead.contains_peer(peer) {
            debug!(%peer, "peer already dead");
            self.pending.remove(peer);
            self.connections.close_and_remove(peer, &mut self.transport);
            return DeathOutcome::AlreadyDead;
        }
        if self.fail_rec.contains(peer) {
            self.activate_standby(peer, now);
            return DeathOutcome::TookOver;
        }
        info!(%peer, "peer dead");
        self.retire(peer, false, now);
        DeathOutcome::Removed
    }

    /// Fails this node over to its first fail-to target and tells every
    /// dependent. Returns false if the node had already failed.
    pub fn self_fail(&mut self, now: Instant) -> bool {
        if !self.alive {
            debug!("already failed over");
            return false;
        }
        self.alive = false;

        let Some(target) = self.fail_to.first().map(|e| (e.peer, e.addr.clone())) else {
            warn!("node failed but has no fail-to target");
            return true;
        };
        let (target_peer, target_addr) = target;
        warn!(target = %target_addr, "failing over to target");

        let notice = Message::fail(self.identity.local().clone(), target_addr.clone());
        if let Err(e) = self.send_to_peer(target_peer, &notice, now) {
            warn!(target = %target_addr, error = %e, "failed to notify fail-to target");
        }
        let notified = self.notify_dependents(&notice, now);
        info!(notified, "dependents told to redirect");
        true
    }

    /// Handles a notice that `from` failed over to `to`.
    pub fn receive_failure_notice(&mut self, from: &PeerAddr, to: &PeerAddr, now: Instant) -> NoticeOutcome {
        if self.dead.contains_addr(from) {
            debug!(%from, "stale failure notice");
            return NoticeOutcome::Stale;
        }
        if from == self.identity.local() {
            warn!(%to, "peer reports this node as failed");
            self.self_fail(now);
            return NoticeOutcome::SelfFailed;
        }

        let old = self.identity.resolve(from);
        if self.fail_rec.contains(old) {
            info!(%from, "failure notice for a peer this node stands by for");
            self.activate_standby(old, now);
            return NoticeOutcome::TookOver;
        }

        self.redirect(old, to, now);
        NoticeOutcome::Redirected
    }

    /// Takes over for a fail-rec peer: retire, cascade, then hand the latest
    /// backup to the application.
    fn activate_standby(&mut self, peer: PeerId, now: Instant) {
        let addr = self.identity.lookup(peer).cloned();
        self.retire(peer, true, now);

        if let Some(addr) = addr {
            let notice = Message::fail(addr.clone(), self.identity.local().clone());
            let notified = self.notify_dependents(&notice, now);
            info!(%peer, %addr, notified, "taking over for failed peer");
        }

        let backup = self.backups.latest(peer).map(|record| record.payload.clone());
        if backup.is_none() {
            warn!(%peer, "no backup received from failed peer, cold start");
        }
        self.service.take_over(peer, backup);
    }

    /// Routes everything known about `old` to the peer at `to`.
    ///
    /// Backups and the fail-to entry move to the new id. The old id's
    /// connection and pending probe are dropped rather than moved: they
    /// describe a socket to the failed peer, and every later send resolves
    /// `old` through [`IdentityRegistry::route`](crate::IdentityRegistry::route)
    /// and dials the new peer on demand.
    fn redirect(&mut self, old: PeerId, to: &PeerAddr, now: Instant) {
        let new = self.identity.resolve(to);
        info!(%old, %new, %to, "redirecting failed peer");

        self.dependents.remove(old);
        if !new.is_self() {
            self.identity.redirect(old, new);
        }
        self.pending.remove(old);
        if !new.is_self() {
            self.backups.rebind(old, new);
        }
        if self.fail_to.contains(old) {
            if new.is_self() {
                self.fail_to.remove(old);
            } else {
                self.fail_to.replace(old, new, to.clone());
                self.sync_roles(new);
            }
        }
        self.connections.close_and_remove(old, &mut self.transport);
        self.record_dead(old, false, now);
    }

    /// Removes a peer from every live registry and appends it to the ledger.
    fn retire(&mut self, peer: PeerId, was_failover_target: bool, now: Instant) {
        self.dependents.remove(peer);
        self.pending.remove(peer);
        self.fail_rec.remove(peer);
        self.fail_to.remove(peer);
        self.connections.close_and_remove(peer, &mut self.transport);
        self.record_dead(peer, was_failover_target, now);
    }

    fn record_dead(&mut self, peer: PeerId, was_failover_target: bool, now: Instant) {
        let Some(addr) = self.identity.lookup(peer).cloned() else {
            warn!(%peer, "dead peer has no known address");
            return;
        };
        self.dead.record(DeadPeer {
            addr,
            peer,
            declared_at: now,
            was_failover_target,
        });
    }

    /// Sends `notice` to every dependent in insertion order. Returns how many
    /// sends succeeded.
    fn notify_dependents(&mut self, notice: &Message, now: Instant) -> usize {
        let mut notified = 0;
        for dependent in self.dependents.peers() {
            match self.send_to_peer(dependent, notice, now) {
                Ok(()) => {
                    self.dependents.mark_contact(dependent, now);
                    notified += 1;
                }
                Err(e) => warn!(%dependent, error = %e, "failed to notify dependent"),
            }
        }
        notified
    }
}
