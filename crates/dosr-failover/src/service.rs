//! Application seam.

use bytes::Bytes;
use dosr_types::PeerId;

/// Capabilities the hosting application must provide.
///
/// The engine refuses to build without one (see
/// [`EngineBuilder::build`](crate::EngineBuilder::build)).
pub trait Service {
    /// Produces a snapshot of the application state for backup pushes.
    fn serialize(&mut self) -> Bytes;

    /// Handles application data received from a peer.
    ///
    /// `data` starts with the frame's 5-byte tag.
    fn consume(&mut self, data: Bytes, from: PeerId);

    /// Activates standby state for a failed peer.
    ///
    /// `backup` is the freshest snapshot received from that peer, or `None`
    /// if it never sent one (a cold start).
    fn take_over(&mut self, peer: PeerId, backup: Option<Bytes>);
}

impl<S: Service + ?Sized> Service for Box<S> {
    fn serialize(&mut self) -> Bytes {
        (**self).serialize()
    }

    fn consume(&mut self, data: Bytes, from: PeerId) {
        (**self).consume(data, from);
    }

    fn take_over(&mut self, peer: PeerId, backup: Option<Bytes>) {
        (**self).take_over(peer, backup);
    }
}
