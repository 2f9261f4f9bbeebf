//! Demonstration application hosted by `dosr start`.
//!
//! Keeps every application message it receives, one per line, and ships
//! that log as its snapshot. Taking over for a peer appends the peer's last
//! snapshot to the local log.

use bytes::{BufMut, Bytes, BytesMut};
use dosr_failover::Service;
use dosr_types::PeerId;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct MemoryService {
    log: BytesMut,
    messages: usize,
    taken_over: Vec<PeerId>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Service for MemoryService {
    fn serialize(&mut self) -> Bytes {
        Bytes::copy_from_slice(&self.log)
    }

    fn consume(&mut self, data: Bytes, from: PeerId) {
        info!(%from, size = data.len(), "application message");
        self.log.put_slice(&data);
        self.log.put_u8(b'\n');
        self.messages += 1;
    }

    fn take_over(&mut self, peer: PeerId, backup: Option<Bytes>) {
        match backup {
            Some(snapshot) => {
                info!(%peer, size = snapshot.len(), "taking over from backup");
                self.log.put_slice(&snapshot);
            }
            None => warn!(%peer, "taking over without a backup"),
        }
        self.taken_over.push(peer);
        info!(
            messages = self.messages,
            taken_over = self.taken_over.len(),
            "standby state active"
        );
    }
}
