//! Backup replication.
//!
//! Outbound: the application snapshot is pushed to fail-to targets, either
//! periodically ([`Engine::run_backup_cycle`]) or on demand. Each push is
//! stamped with a strictly increasing wall-clock timestamp.
//!
//! Inbound: one [`BackupRecord`] per source. A backup replaces the stored
//! one only if its timestamp is strictly newer; ties keep what is there.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use dosr_types::{PeerAddr, PeerId, Timestamp};
use dosr_wire::Message;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::FailoverResult;
use crate::service::Service;
use crate::transport::Transport;

/// The freshest snapshot received from one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub source: PeerId,
    /// Sender-supplied timestamp.
    pub timestamp: Timestamp,
    pub payload: Bytes,
}

/// Outcome of merging an incoming backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Accepted,
    Superseded,
}

#[derive(Debug, Default)]
pub struct BackupStore {
    records: HashMap<PeerId, BackupRecord>,
}

impl BackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-writer-wins merge by timestamp.
    pub fn merge(&mut self, source: PeerId, timestamp: Timestamp, payload: Bytes) -> MergeOutcome {
        match self.records.get(&source) {
            Some(existing) if existing.timestamp >= timestamp => MergeOutcome::Superseded,
            _ => {
                self.records.insert(
                    source,
                    BackupRecord {
                        source,
                        timestamp,
                        payload,
                    },
                );
                MergeOutcome::Accepted
            }
        }
    }

    pub fn latest(&self, source: PeerId) -> Option<&BackupRecord> {
        self.records.get(&source)
    }

    /// Moves the record held for `old` under `new`, merging with whatever
    /// `new` already has.
    pub fn rebind(&mut self, old: PeerId, new: PeerId) {
        if old == new {
            return;
        }
        if let Some(record) = self.records.remove(&old) {
            self.merge(new, record.timestamp, record.payload);
        }
    }

    pub fn remove(&mut self, source: PeerId) -> Option<BackupRecord> {
        self.records.remove(&source)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T: Transport, S: Service> Engine<T, S> {
    /// Pushes one shared snapshot to every fail-to target not contacted
    /// within the forced backup interval. Returns how many pushes succeeded.
    ///
    /// A failed attempt still starts a new interval for that target.
    pub fn run_backup_cycle(&mut self, now: Instant) -> usize {
        if self.is_killed() {
            return 0;
        }
        let due = self.fail_to.due(now, self.config.force_backup_interval);
        if due.is_empty() {
            return 0;
        }
        let snapshot = self.service.serialize();
        let pushed = self.push_snapshot(&due, &snapshot, now);
        debug!(due = due.len(), pushed, "backup cycle complete");
        pushed
    }

    /// Pushes one shared snapshot to every fail-to target now.
    pub fn push_to_fail_to_targets(&mut self, now: Instant) -> usize {
        if self.is_killed() {
            return 0;
        }
        let targets = self.fail_to.peers();
        if targets.is_empty() {
            return 0;
        }
        let snapshot = self.service.serialize();
        self.push_snapshot(&targets, &snapshot, now)
    }

    /// Pushes a fresh snapshot to one known peer.
    pub fn push_to_peer(&mut self, peer: PeerId, now: Instant) -> FailoverResult<()> {
        let snapshot = self.service.serialize();
        self.push(peer, snapshot, now)
    }

    /// Pushes a fresh snapshot to an address, allocating an id for it if new.
    pub fn push_to_address(&mut self, addr: &PeerAddr, now: Instant) -> FailoverResult<PeerId> {
        let peer = self.identity.resolve(addr);
        self.push_to_peer(peer, now)?;
        Ok(peer)
    }

    /// Stores a backup received from `source`.
    pub fn receive_backup(&mut self, source: PeerId, timestamp: Timestamp, payload: Bytes) -> MergeOutcome {
        let size = payload.len();
        let outcome = self.backups.merge(source, timestamp, payload);
        match outcome {
            MergeOutcome::Accepted => debug!(%source, %timestamp, size, "backup accepted"),
            MergeOutcome::Superseded => debug!(%source, %timestamp, "stale backup ignored"),
        }
        outcome
    }

    fn push_snapshot(&mut self, targets: &[PeerId], snapshot: &Bytes, now: Instant) -> usize {
        let mut pushed = 0;
        for peer in targets {
            // Attempts count as contact: an unreachable target is retried
            // once per interval, not on every tick.
            self.fail_to.mark_contact(*peer, now);
            match self.push(*peer, snapshot.clone(), now) {
                Ok(()) => pushed += 1,
                Err(e) => warn!(%peer, error = %e, "backup push failed"),
            }
        }
        if pushed > 0 {
            info!(pushed, size = snapshot.len(), "backup pushed");
        }
        pushed
    }

    fn push(&mut self, peer: PeerId, snapshot: Bytes, now: Instant) -> FailoverResult<()> {
        let timestamp = Timestamp::now_monotonic(self.last_backup_stamp);
        self.last_backup_stamp = Some(timestamp);
        self.send_to_peer(peer, &Message::backup(timestamp, snapshot), now)
    }
}
