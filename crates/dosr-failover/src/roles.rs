//! Peer role sets: FailTo, FailRec and Dependents.

use std::fmt::{self, Display};
use std::time::{Duration, Instant};

use dosr_types::{PeerAddr, PeerId};

use crate::transport::ConnId;

/// Which relationship a [`RoleSet`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Peers this node fails over to.
    FailTo,
    /// Peers this node is the hot standby for.
    FailRec,
    /// Peers that fail over to this node.
    Dependents,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailTo => write!(f, "fail-to"),
            Self::FailRec => write!(f, "fail-rec"),
            Self::Dependents => write!(f, "dependents"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEntry {
    pub peer: PeerId,
    pub addr: PeerAddr,
    pub conn: Option<ConnId>,
    /// Last backup push (FailTo) or notice sent to this peer. `None` until
    /// the first one.
    pub last_contact: Option<Instant>,
    /// True while a transport to the peer is attached.
    pub active: bool,
}

/// Insertion-ordered set of peers keyed by id.
#[derive(Debug, Clone)]
pub struct RoleSet {
    role: Role,
    entries: Vec<RoleEntry>,
}

impl RoleSet {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            entries: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Appends a peer. Returns false if it was already present.
    pub fn insert(&mut self, peer: PeerId, addr: PeerAddr) -> bool {
        if self.contains(peer) {
            return false;
        }
        self.entries.push(RoleEntry {
            peer,
            addr,
            conn: None,
            last_contact: None,
            active: false,
        });
        true
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.entries.iter().any(|e| e.peer == peer)
    }

    pub fn get(&self, peer: PeerId) -> Option<&RoleEntry> {
        self.entries.iter().find(|e| e.peer == peer)
    }

    pub fn remove(&mut self, peer: PeerId) -> Option<RoleEntry> {
        let index = self.entries.iter().position(|e| e.peer == peer)?;
        Some(self.entries.remove(index))
    }

    /// Replaces `old` in place, keeping its position in the order.
    ///
    /// If `new` is already present the old entry is simply dropped.
    pub fn replace(&mut self, old: PeerId, new: PeerId, addr: PeerAddr) -> bool {
        let Some(index) = self.entries.iter().position(|e| e.peer == old) else {
            return false;
        };
        if self.contains(new) {
            self.entries.remove(index);
        } else {
            self.entries[index] = RoleEntry {
                peer: new,
                addr,
                conn: None,
                last_contact: None,
                active: false,
            };
        }
        true
    }

    /// Records the transport currently attached to `peer`.
    pub fn set_connection(&mut self, peer: PeerId, conn: Option<ConnId>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.peer == peer) {
            entry.conn = conn;
            entry.active = conn.is_some();
        }
    }

    pub fn mark_contact(&mut self, peer: PeerId, now: Instant) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.peer == peer) {
            entry.last_contact = Some(now);
        }
    }

    /// Peers not contacted within `interval`, in insertion order.
    pub fn due(&self, now: Instant, interval: Duration) -> Vec<PeerId> {
        self.entries
            .iter()
            .filter(|e| {
                e.last_contact
                    .is_none_or(|at| now.saturating_duration_since(at) >= interval)
            })
            .map(|e| e.peer)
            .collect()
    }

    pub fn first(&self) -> Option<&RoleEntry> {
        self.entries.first()
    }

    /// Peer ids in insertion order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.entries.iter().map(|e| e.peer).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
