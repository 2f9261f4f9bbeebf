//! Heartbeat monitor.
//!
//! Per-peer state machine:
//!
//! ```text
//!            silence ≥ timeout                no reply within timeout
//! ┌───────┐ ─────────────────► ┌─────────┐ ─────────────────────────► ┌──────┐
//! │ ALIVE │                    │ PROBING │                            │ DEAD │
//! └───────┘ ◄───────────────── └─────────┘ ─────────────────────────► └──────┘
//!              reply (true)                     reply (false)
//! ```
//!
//! A peer that stops talking at `t` is probed at `t + timeout` and declared
//! dead at `t + 2 × timeout`.
//!
//! The same cycle checks this node's own reachability: if nothing has
//! arrived from anyone for longer than the timeout while connections are
//! open, the node assumes it is the one cut off and fails itself over.

use std::collections::BTreeMap;
use std::time::Instant;

use dosr_types::{PeerAddr, PeerId};
use dosr_wire::Message;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::service::Service;
use crate::transport::{ConnId, Transport};

/// An outstanding liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingProbe {
    pub peer: PeerId,
    pub addr: PeerAddr,
    pub sent_at: Instant,
    /// False once the peer has answered negatively.
    pub awaiting_reply: bool,
}

/// Peers whose status is unsure, keyed by id.
#[derive(Debug, Default)]
pub struct PendingProbes {
    entries: BTreeMap<PeerId, PendingProbe>,
}

impl PendingProbes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, probe: PendingProbe) {
        self.entries.insert(probe.peer, probe);
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.entries.contains_key(&peer)
    }

    pub fn get(&self, peer: PeerId) -> Option<&PendingProbe> {
        self.entries.get(&peer)
    }

    pub fn remove(&mut self, peer: PeerId) -> Option<PendingProbe> {
        self.entries.remove(&peer)
    }

    /// Records a negative answer. Returns false if no probe was outstanding.
    pub fn mark_negative(&mut self, peer: PeerId) -> bool {
        match self.entries.get_mut(&peer) {
            Some(probe) => {
                probe.awaiting_reply = false;
                true
            }
            None => false,
        }
    }

    /// Probes that answered negatively or were sent at least `timeout` ago.
    fn expired(&self, now: Instant, timeout: std::time::Duration) -> Vec<PeerId> {
        self.entries
            .values()
            .filter(|p| !p.awaiting_reply || now.saturating_duration_since(p.sent_at) >= timeout)
            .map(|p| p.peer)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingProbe> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What one heartbeat cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub probed: Vec<PeerId>,
    pub declared_dead: Vec<PeerId>,
    pub self_failed: bool,
}

impl<T: Transport, S: Service> Engine<T, S> {
    /// Runs sweep, reconciliation and the self-check, in that order.
    pub fn heartbeat_cycle(&mut self, now: Instant) -> HeartbeatReport {
        if self.is_killed() {
            return HeartbeatReport::default();
        }
        let probed = self.sweep(now);
        let declared_dead = self.reconcile(now);
        let self_failed = self.check_self(now);
        HeartbeatReport {
            probed,
            declared_dead,
            self_failed,
        }
    }

    /// Probes every peer silent for at least the failover timeout that is
    /// not already being probed.
    pub fn sweep(&mut self, now: Instant) -> Vec<PeerId> {
        if self.is_killed() {
            return Vec::new();
        }
        let timeout = self.config.failover_timeout;
        let silent: Vec<(PeerId, PeerAddr)> = self
            .connections
            .iter()
            .filter(|c| c.silence(now) >= timeout && !self.pending.contains(c.id))
            .map(|c| (c.id, c.addr.clone()))
            .collect();

        let probe = Message::probe(self.identity.local().clone());
        let mut probed = Vec::with_capacity(silent.len());
        for (peer, addr) in silent {
            // Registered before sending: a failed send declares the peer dead,
            // and that must clear this entry too.
            self.pending.insert(PendingProbe {
                peer,
                addr: addr.clone(),
                sent_at: now,
                awaiting_reply: true,
            });
            self.connections.mark_suspect(peer);
            info!(%peer, %addr, "peer silent, sending liveness probe");
            match self.send_to_peer(peer, &probe, now) {
                Ok(()) => probed.push(peer),
                Err(e) => debug!(%peer, error = %e, "liveness probe not delivered"),
            }
        }
        probed
    }

    /// Declares dead every peer whose probe expired or was answered
    /// negatively.
    pub fn reconcile(&mut self, now: Instant) -> Vec<PeerId> {
        let expired = self.pending.expired(now, self.config.failover_timeout);
        for peer in &expired {
            if let Some(probe) = self.pending.remove(*peer) {
                info!(
                    peer = %probe.peer,
                    addr = %probe.addr,
                    negative = !probe.awaiting_reply,
                    "liveness probe expired, declaring peer dead"
                );
            }
            self.handle_peer_death(*peer, now);
        }
        expired
    }

    /// Fails this node over if no peer has been heard from for longer than
    /// the failover timeout, whether or not any connection is still open.
    /// Returns true if self-failure was triggered.
    pub fn check_self(&mut self, now: Instant) -> bool {
        if !self.config.detect_self_failure || !self.still_alive() {
            return false;
        }
        let Some(last) = self.last_inbound else {
            return false;
        };
        let silence = now.saturating_duration_since(last);
        if silence > self.config.failover_timeout {
            warn!(silence_ms = silence.as_millis() as u64, "no inbound traffic from any peer, assuming this node is unreachable");
            self.self_fail(now)
        } else {
            false
        }
    }

    /// Handles a probe received on `via`: replies affirmatively if this node
    /// is still alive.
    pub(crate) fn answer_probe(&mut self, via: ConnId, origin: &PeerAddr, now: Instant) {
        if !self.still_alive() {
            debug!(%origin, "not answering probe, node is failed");
            return;
        }
        let reply = Message::reply(origin.clone(), true);

        // Prefer a connection already registered for the prober's listening
        // address, then the one the probe arrived on, then a fresh one.
        let known = self
            .identity
            .find(origin)
            .filter(|id| !id.is_self() && self.connections.get(*id).is_some());
        let result = match known {
            Some(peer) => self.send_to_peer(peer, &reply, now),
            None => match reply.to_bytes() {
                Ok(bytes) => match self.transport.send(via, &bytes) {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        debug!(%via, error = %e, "reply on inbound connection failed, dialing prober");
                        self.send_to_address(origin, &reply, now).map(|_| ())
                    }
                },
                Err(e) => Err(e.into()),
            },
        };
        if let Err(e) = result {
            warn!(%origin, error = %e, "failed to answer liveness probe");
        }
    }

    /// Applies a probe reply from `peer`.
    pub(crate) fn record_probe_reply(&mut self, peer: PeerId, alive: bool, now: Instant) {
        if alive {
            self.connections.touch(peer, now);
            if self.pending.remove(peer).is_some() {
                info!(%peer, "peer answered liveness probe");
            }
        } else if self.pending.mark_negative(peer) {
            info!(%peer, "peer reported itself failed");
        } else {
            debug!(%peer, "negative liveness reply without an outstanding probe");
        }
    }
}
