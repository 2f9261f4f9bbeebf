//! Message dispatcher: routes inbound frames to the heartbeat monitor, the
//! coordinator, the backup store or the application.

use std::time::Instant;

use dosr_types::{PeerAddr, PeerId};
use dosr_wire::{AliveMessage, Frame, Message};
use tracing::{debug, info, instrument, warn};

use crate::coordinator::DeathOutcome;
use crate::engine::Engine;
use crate::service::Service;
use crate::transport::{ConnId, Transport};

impl<T: Transport, S: Service> Engine<T, S> {
    /// Registers an accepted connection under the id of its remote address.
    ///
    /// The remote is usually an ephemeral port, so the id is provisional; a
    /// following `hello` frame moves the connection to the peer's stable id
    /// and releases the provisional one.
    pub fn on_accept(&mut self, conn: ConnId, remote: &PeerAddr, now: Instant) -> PeerId {
        let peer = self.identity.resolve_provisional(remote);
        debug!(%conn, %remote, %peer, "accepted connection");
        self.connections.attach(peer, remote, conn, now);
        self.sync_roles(peer);
        peer
    }

    /// Handles one inbound frame. Malformed frames are logged and dropped.
    #[instrument(skip_all, fields(conn = %conn))]
    pub fn on_frame(&mut self, conn: ConnId, frame: Frame, now: Instant) {
        if self.is_killed() {
            return;
        }
        let Some(peer) = self.connections.peer_for(conn) else {
            warn!("frame on unregistered connection");
            return;
        };
        self.connections.touch(peer, now);
        self.last_inbound = Some(now);

        let message = match Message::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(%peer, error = %e, "dropping malformed frame");
                return;
            }
        };
        debug!(%peer, kind = message.kind(), "received");

        match message {
            Message::Kill => {
                info!(%peer, "kill requested by peer");
                self.kill();
            }
            Message::Backup {
                timestamp,
                snapshot,
            } => {
                self.receive_backup(peer, timestamp, snapshot);
            }
            Message::Fail { from, to } => {
                let outcome = self.receive_failure_notice(&from, &to, now);
                debug!(%from, %to, ?outcome, "failure notice handled");
            }
            Message::Alive(AliveMessage::Probe { origin }) => {
                self.answer_probe(conn, &origin, now);
            }
            Message::Alive(AliveMessage::Reply { alive, .. }) => {
                self.record_probe_reply(peer, alive, now);
            }
            Message::Hello { addr } => self.bind_connection(conn, &addr, now),
            Message::Application(frame) => {
                self.service.consume(frame.application_bytes(), peer);
            }
        }
    }

    /// Handles a closed connection. Losing a peer's last transport is treated
    /// as that peer's death.
    pub fn on_disconnect(&mut self, conn: ConnId, now: Instant) -> Option<DeathOutcome> {
        let detached = self.connections.detach(conn)?;
        self.sync_roles(detached.peer);
        debug!(%conn, peer = %detached.peer, last = detached.last, "connection closed");

        if !detached.last || self.is_killed() {
            return None;
        }
        info!(peer = %detached.peer, "lost last connection to peer");
        Some(self.handle_peer_death(detached.peer, now))
    }

    /// Handles an outbound connection that never became established.
    ///
    /// Unlike a disconnect this is not evidence of death: the peer may not
    /// be up yet. The next send dials again.
    pub fn on_connect_failed(&mut self, conn: ConnId) {
        let Some(detached) = self.connections.detach(conn) else {
            return;
        };
        warn!(%conn, peer = %detached.peer, "outbound connection failed");
        if detached.last {
            self.connections.close_and_remove(detached.peer, &mut self.transport);
        }
        self.sync_roles(detached.peer);
    }

    /// Files `conn` under the id of the peer's announced listening address.
    fn bind_connection(&mut self, conn: ConnId, addr: &PeerAddr, now: Instant) {
        let peer = self.identity.resolve(addr);
        if peer.is_self() {
            warn!(%conn, "peer announced this node's own address");
            return;
        }
        let previous = self.connections.rebind(conn, peer, addr, now);
        if let Some(provisional) = previous.filter(|p| self.identity.is_provisional(*p)) {
            self.backups.rebind(provisional, peer);
            self.forget_provisional(provisional);
            debug!(%provisional, %peer, "dropped provisional identity");
        }
        self.sync_roles(peer);
        info!(%conn, %peer, %addr, "peer identified");
    }

    /// Drops every trace of a provisional id.
    pub(crate) fn forget_provisional(&mut self, peer: PeerId) {
        self.pending.remove(peer);
        self.backups.remove(peer);
        self.connections.close_and_remove(peer, &mut self.transport);
        self.identity.release(peer);
    }
}
