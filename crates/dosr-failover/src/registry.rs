//! Identity registry: `(address, port)` ⇄ [`PeerId`].
//!
//! Ids are allocated monotonically and never deleted or reused, so a dead
//! peer that reappears at the same address keeps its id. The local address
//! always maps to [`PeerId::SELF`].
//!
//! Accepted connections arrive from ephemeral ports. Their ids are
//! provisional until the peer announces its listening address; a
//! provisional id can be released, and released ids are not reused either.
//!
//! A failure notice can redirect an id: traffic addressed to the failed
//! peer is routed to the peer that took over. [`IdentityRegistry::route`]
//! follows these redirects.

use std::collections::{HashMap, HashSet};

use dosr_types::{PeerAddr, PeerId};

#[derive(Debug)]
pub struct IdentityRegistry {
    local: PeerAddr,
    by_addr: HashMap<PeerAddr, PeerId>,
    by_id: HashMap<PeerId, PeerAddr>,
    redirects: HashMap<PeerId, PeerId>,
    provisional: HashSet<PeerId>,
    next_id: i64,
}

impl IdentityRegistry {
    pub fn new(local: PeerAddr) -> Self {
        let mut by_addr = HashMap::new();
        let mut by_id = HashMap::new();
        by_addr.insert(local.clone(), PeerId::SELF);
        by_id.insert(PeerId::SELF, local.clone());
        Self {
            local,
            by_addr,
            by_id,
            redirects: HashMap::new(),
            provisional: HashSet::new(),
            next_id: 0,
        }
    }

    /// This node's own address.
    pub fn local(&self) -> &PeerAddr {
        &self.local
    }

    /// Returns the id for `addr`, allocating one on first sight.
    ///
    /// A provisional id resolved this way becomes permanent.
    pub fn resolve(&mut self, addr: &PeerAddr) -> PeerId {
        if let Some(id) = self.by_addr.get(addr).copied() {
            self.provisional.remove(&id);
            return id;
        }
        self.allocate(addr)
    }

    /// Returns the id for the remote address of an accepted connection.
    ///
    /// A newly allocated id stays provisional until [`resolve`](Self::resolve)
    /// names the same address, and can be dropped with
    /// [`release`](Self::release).
    pub fn resolve_provisional(&mut self, addr: &PeerAddr) -> PeerId {
        if let Some(id) = self.by_addr.get(addr) {
            return *id;
        }
        let id = self.allocate(addr);
        self.provisional.insert(id);
        id
    }

    pub fn is_provisional(&self, id: PeerId) -> bool {
        self.provisional.contains(&id)
    }

    /// Forgets a provisional id. Permanent ids are kept; returns whether
    /// anything was removed.
    pub fn release(&mut self, id: PeerId) -> bool {
        if !self.provisional.remove(&id) {
            return false;
        }
        if let Some(addr) = self.by_id.remove(&id) {
            self.by_addr.remove(&addr);
        }
        self.redirects.remove(&id);
        true
    }

    /// Returns the id for `addr` without allocating.
    pub fn find(&self, addr: &PeerAddr) -> Option<PeerId> {
        self.by_addr.get(addr).copied()
    }

    pub fn lookup(&self, id: PeerId) -> Option<&PeerAddr> {
        self.by_id.get(&id)
    }

    /// Routes future traffic for `old` to `new`.
    pub fn redirect(&mut self, old: PeerId, new: PeerId) {
        debug_assert!(!old.is_self(), "the local node is never redirected");
        if old != new {
            self.redirects.insert(old, new);
        }
    }

    /// Follows redirects from `id` to the peer currently serving it.
    pub fn route(&self, id: PeerId) -> PeerId {
        let mut current = id;
        // A chain can be at most as long as the number of redirects; anything
        // longer is a cycle.
        for _ in 0..=self.redirects.len() {
            match self.redirects.get(&current) {
                Some(next) if *next != id => current = *next,
                _ => return current,
            }
        }
        current
    }

    fn allocate(&mut self, addr: &PeerAddr) -> PeerId {
        let id = PeerId::new(self.next_id);
        self.next_id += 1;
        self.by_addr.insert(addr.clone(), id);
        self.by_id.insert(id, addr.clone());
        id
    }

    /// Number of known addresses, including the local one.
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}
