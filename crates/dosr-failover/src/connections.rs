//! Connection table: per-peer transport state and activity.
//!
//! One [`PeerConnection`] per peer id. A peer may hold more than one
//! transport (the connection it dialed to us and the one we dialed to it);
//! the first attached is the one used for sends.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use dosr_types::{PeerAddr, PeerId};

use crate::transport::{ConnId, Transport};

/// Connection state for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    pub id: PeerId,
    pub addr: PeerAddr,
    pub transports: Vec<ConnId>,
    pub last_activity: Instant,
    pub alive: bool,
}

impl PeerConnection {
    /// The transport used for outbound traffic.
    pub fn primary(&self) -> Option<ConnId> {
        self.transports.first().copied()
    }

    /// Time since the last inbound activity.
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}

/// Result of removing one transport from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detached {
    pub peer: PeerId,
    /// True if the peer has no transports left.
    pub last: bool,
}

#[derive(Debug, Default)]
pub struct ConnectionTable {
    peers: BTreeMap<PeerId, PeerConnection>,
    by_conn: HashMap<ConnId, PeerId>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a transport to a peer, creating the entry if needed.
    ///
    /// Opening counts as activity: `last_activity` is reset and the peer is
    /// marked alive.
    pub fn attach(&mut self, id: PeerId, addr: &PeerAddr, conn: ConnId, now: Instant) {
        let previous = self.by_conn.insert(conn, id);
        if let Some(previous) = previous.filter(|p| *p != id) {
            self.unlink(previous, conn);
        }
        let entry = self.peers.entry(id).or_insert_with(|| PeerConnection {
            id,
            addr: addr.clone(),
            transports: Vec::new(),
            last_activity: now,
            alive: true,
        });
        if !entry.transports.contains(&conn) {
            entry.transports.push(conn);
        }
        entry.last_activity = now;
        entry.alive = true;
    }

    /// Removes one transport. The peer entry stays even when it was the last.
    pub fn detach(&mut self, conn: ConnId) -> Option<Detached> {
        let peer = self.by_conn.remove(&conn)?;
        let entry = self.peers.get_mut(&peer)?;
        entry.transports.retain(|c| *c != conn);
        Some(Detached {
            peer,
            last: entry.transports.is_empty(),
        })
    }

    /// Moves a transport to another peer. Returns the previous owner if its
    /// entry was left without transports and therefore dropped.
    pub fn rebind(
        &mut self,
        conn: ConnId,
        id: PeerId,
        addr: &PeerAddr,
        now: Instant,
    ) -> Option<PeerId> {
        let previous = self.by_conn.get(&conn).copied();
        self.attach(id, addr, conn, now);
        let previous = previous.filter(|p| *p != id)?;
        let empty = self
            .peers
            .get(&previous)
            .is_some_and(|e| e.transports.is_empty());
        if empty {
            self.peers.remove(&previous);
            Some(previous)
        } else {
            None
        }
    }

    /// Records inbound activity. Returns false for unknown peers.
    pub fn touch(&mut self, id: PeerId, now: Instant) -> bool {
        match self.peers.get_mut(&id) {
            Some(entry) => {
                entry.last_activity = now;
                entry.alive = true;
                true
            }
            None => false,
        }
    }

    /// Marks a peer as suspect while a probe is outstanding.
    pub fn mark_suspect(&mut self, id: PeerId) {
        if let Some(entry) = self.peers.get_mut(&id) {
            entry.alive = false;
        }
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerConnection> {
        self.peers.get(&id)
    }

    /// The peer a transport belongs to.
    pub fn peer_for(&self, conn: ConnId) -> Option<PeerId> {
        self.by_conn.get(&conn).copied()
    }

    /// Closes every transport of a peer and removes its entry.
    ///
    /// Returns whether an entry existed.
    pub fn close_and_remove<T: Transport + ?Sized>(&mut self, id: PeerId, transport: &mut T) -> bool {
        let Some(entry) = self.peers.remove(&id) else {
            return false;
        };
        for conn in entry.transports {
            self.by_conn.remove(&conn);
            transport.close(conn);
        }
        true
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerConnection> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn unlink(&mut self, peer: PeerId, conn: ConnId) {
        if let Some(entry) = self.peers.get_mut(&peer) {
            entry.transports.retain(|c| *c != conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn addr(host: &str) -> PeerAddr {
        PeerAddr::new(host, 9000)
    }

    #[test]
    fn attach_touch_and_silence() {
        let t0 = Instant::now();
        let mut table = ConnectionTable::new();
        let peer = PeerId::new(0);
        table.attach(peer, &addr("b"), ConnId::new(1), t0);

        table.mark_suspect(peer);
        assert!(!table.get(peer).unwrap().alive);

        let later = t0 + Duration::from_secs(3);
        assert!(table.touch(peer, later));
        let entry = table.get(peer).unwrap();
        assert!(entry.alive);
        assert_eq!(entry.silence(later + Duration::from_secs(1)), Duration::from_secs(1));
        assert!(!table.touch(PeerId::new(9), later));
    }

    #[test]
    fn first_transport_is_primary() {
        let t0 = Instant::now();
        let mut table = ConnectionTable::new();
        let peer = PeerId::new(0);
        table.attach(peer, &addr("b"), ConnId::new(4), t0);
        table.attach(peer, &addr("b"), ConnId::new(7), t0);

        assert_eq!(table.get(peer).unwrap().primary(), Some(ConnId::new(4)));
        assert_eq!(
            table.detach(ConnId::new(4)),
            Some(Detached { peer, last: false })
        );
        assert_eq!(table.get(peer).unwrap().primary(), Some(ConnId::new(7)));
        assert_eq!(
            table.detach(ConnId::new(7)),
            Some(Detached { peer, last: true })
        );
        assert_eq!(table.detach(ConnId::new(7)), None);
    }

    #[test]
    fn rebind_drops_empty_provisional_entry() {
        let t0 = Instant::now();
        let mut table = ConnectionTable::new();
        let provisional = PeerId::new(0);
        let announced = PeerId::new(1);
        let conn = ConnId::new(3);
        table.attach(provisional, &PeerAddr::new("b", 51234), conn, t0);

        let dropped = table.rebind(conn, announced, &addr("b"), t0);

        assert_eq!(dropped, Some(provisional));
        assert!(table.get(provisional).is_none());
        assert_eq!(table.peer_for(conn), Some(announced));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn close_and_remove_closes_every_transport() {
        let t0 = Instant::now();
        let mut transport = MemoryTransport::new();
        let a = transport.accept(addr("b"));
        let b = transport.accept(addr("b"));

        let mut table = ConnectionTable::new();
        let peer = PeerId::new(0);
        table.attach(peer, &addr("b"), a, t0);
        table.attach(peer, &addr("b"), b, t0);

        assert!(table.close_and_remove(peer, &mut transport));
        assert!(!transport.is_open(a));
        assert!(!transport.is_open(b));
        assert_eq!(table.peer_for(a), None);
        assert!(!table.close_and_remove(peer, &mut transport));
        assert!(table.is_empty());
    }
}
