//! The coordination engine and its send path.

use std::fmt::{self, Display};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dosr_types::{PeerAddr, PeerId, Timestamp, Topology};
use dosr_wire::Message;
use tracing::{debug, info, warn};

use crate::backup::BackupStore;
use crate::config::EngineConfig;
use crate::connections::{ConnectionTable, PeerConnection};
use crate::coordinator::DeadLedger;
use crate::error::{FailoverError, FailoverResult};
use crate::heartbeat::PendingProbes;
use crate::registry::IdentityRegistry;
use crate::roles::{Role, RoleSet};
use crate::service::Service;
use crate::transport::{ConnId, Transport};

// ============================================================================
// Kill Switch
// ============================================================================

/// Shared stop flag.
///
/// Starts cleared and can only be set. Once set, the engine ignores inbound
/// frames, sends nothing, and the runtime loop exits at its next iteration.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch(Arc<AtomicBool>);

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns true if this call was the one that set it.
    pub fn trigger(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Point-in-time summary of the engine's registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub alive: bool,
    pub killed: bool,
    pub connections: usize,
    pub pending_probes: usize,
    pub dead_peers: usize,
    pub backups: usize,
    pub fail_to: usize,
    pub fail_rec: usize,
    pub dependents: usize,
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alive={} killed={} connections={} pending={} dead={} backups={} fail_to={} fail_rec={} dependents={}",
            self.alive,
            self.killed,
            self.connections,
            self.pending_probes,
            self.dead_peers,
            self.backups,
            self.fail_to,
            self.fail_rec,
            self.dependents,
        )
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Single owner of every coordination registry.
///
/// Registry fields are declared in the global acquisition order: dead
/// ledger, dependents, identity, pending probes, backups, fail-rec,
/// fail-to, connections. Operations that touch several registries visit
/// them in this order.
///
/// Every operation takes `now` explicitly; the engine never reads a clock
/// for liveness decisions.
#[derive(Debug)]
pub struct Engine<T, S> {
    pub(crate) config: EngineConfig,

    pub(crate) dead: DeadLedger,
    pub(crate) dependents: RoleSet,
    pub(crate) identity: IdentityRegistry,
    pub(crate) pending: PendingProbes,
    pub(crate) backups: BackupStore,
    pub(crate) fail_rec: RoleSet,
    pub(crate) fail_to: RoleSet,
    pub(crate) connections: ConnectionTable,

    pub(crate) transport: T,
    pub(crate) service: S,

    pub(crate) kill: KillSwitch,
    /// This node's own liveness. Only ever goes from true to false.
    pub(crate) alive: bool,
    /// Most recent inbound frame from any peer.
    pub(crate) last_inbound: Option<Instant>,
    pub(crate) last_backup_stamp: Option<Timestamp>,
}

impl<T: Transport, S: Service> Engine<T, S> {
    pub fn builder(config: EngineConfig) -> EngineBuilder<T, S> {
        EngineBuilder::new(config)
    }

    /// Opens connections to every fail-to target and starts the inbound
    /// silence clock. Returns how many connections were opened.
    pub fn start(&mut self, now: Instant) -> usize {
        self.last_inbound = Some(now);
        let mut opened = 0;
        for peer in self.fail_to.peers() {
            match self.connection_for(peer, now) {
                Ok(_) => opened += 1,
                Err(e) => warn!(%peer, error = %e, "could not reach fail-to target at startup"),
            }
        }
        info!(local = %self.identity.local(), opened, "failover engine started");
        opened
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local(&self) -> &PeerAddr {
        self.identity.local()
    }

    pub fn kill_switch(&self) -> KillSwitch {
        self.kill.clone()
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_triggered()
    }

    /// Stops the engine.
    pub fn kill(&mut self) {
        if self.kill.trigger() {
            info!("engine killed");
        }
    }

    /// True while this node is neither killed nor self-failed.
    pub fn still_alive(&self) -> bool {
        self.alive && !self.is_killed()
    }

    /// True if `addr` has an open connection that is not awaiting a probe
    /// reply.
    pub fn is_peer_alive(&self, addr: &PeerAddr) -> bool {
        self.identity
            .find(addr)
            .filter(|id| !self.dead.contains_peer(*id))
            .and_then(|id| self.connections.get(id))
            .is_some_and(|c| c.alive)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            alive: self.alive,
            killed: self.is_killed(),
            connections: self.connections.len(),
            pending_probes: self.pending.len(),
            dead_peers: self.dead.len(),
            backups: self.backups.len(),
            fail_to: self.fail_to.len(),
            fail_rec: self.fail_rec.len(),
            dependents: self.dependents.len(),
        }
    }

    pub fn identity(&self) -> &IdentityRegistry {
        &self.identity
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn pending(&self) -> &PendingProbes {
        &self.pending
    }

    pub fn dead(&self) -> &DeadLedger {
        &self.dead
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn roles(&self, role: Role) -> &RoleSet {
        match role {
            Role::FailTo => &self.fail_to,
            Role::FailRec => &self.fail_rec,
            Role::Dependents => &self.dependents,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    // ------------------------------------------------------------------------
    // Sends
    // ------------------------------------------------------------------------

    /// Sends a message to a known peer, opening a connection if needed.
    ///
    /// Redirected ids are routed to the peer that took over. A write error
    /// on an established connection declares the peer dead. Once killed,
    /// this is a no-op.
    pub fn send_to_peer(&mut self, peer: PeerId, message: &Message, now: Instant) -> FailoverResult<()> {
        if self.is_killed() {
            return Ok(());
        }
        let peer = self.identity.route(peer);
        if peer.is_self() {
            return Err(FailoverError::SendToSelf);
        }
        let bytes = message.to_bytes()?;
        let conn = self.connection_for(peer, now)?;

        if let Err(source) = self.transport.send(conn, &bytes) {
            warn!(%peer, %conn, kind = message.kind(), error = %source, "send failed, declaring peer dead");
            self.handle_peer_death(peer, now);
            return Err(FailoverError::Send { peer, source });
        }
        debug!(%peer, %conn, kind = message.kind(), "sent");
        Ok(())
    }

    /// Sends a message to an address, allocating an id for it if new.
    pub fn send_to_address(&mut self, addr: &PeerAddr, message: &Message, now: Instant) -> FailoverResult<PeerId> {
        let peer = self.identity.resolve(addr);
        self.send_to_peer(peer, message, now)?;
        Ok(peer)
    }

    /// Returns the primary transport for `peer`, dialing it if absent.
    pub(crate) fn connection_for(&mut self, peer: PeerId, now: Instant) -> FailoverResult<ConnId> {
        if let Some(conn) = self.connections.get(peer).and_then(PeerConnection::primary) {
            return Ok(conn);
        }
        let addr = self
            .identity
            .lookup(peer)
            .cloned()
            .ok_or(FailoverError::UnknownPeer(peer))?;

        let conn = self
            .transport
            .connect(&addr)
            .map_err(|source| FailoverError::Connect {
                addr: addr.clone(),
                source,
            })?;

        // The acceptor only sees our ephemeral port; announce the listening
        // address so it files this connection under our stable id.
        let hello = Message::Hello {
            addr: self.identity.local().clone(),
        }
        .to_bytes()?;
        if let Err(source) = self.transport.send(conn, &hello) {
            self.transport.close(conn);
            return Err(FailoverError::Connect { addr, source });
        }

        info!(%peer, %addr, %conn, "opened connection");
        self.connections.attach(peer, &addr, conn, now);
        self.sync_roles(peer);
        Ok(conn)
    }

    /// Mirrors the connection table's primary transport into the role sets.
    pub(crate) fn sync_roles(&mut self, peer: PeerId) {
        let conn = self.connections.get(peer).and_then(PeerConnection::primary);
        self.dependents.set_connection(peer, conn);
        self.fail_rec.set_connection(peer, conn);
        self.fail_to.set_connection(peer, conn);
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds an [`Engine`] from configuration, topology and collaborators.
#[derive(Debug)]
pub struct EngineBuilder<T, S> {
    config: EngineConfig,
    topology: Topology,
    transport: Option<T>,
    service: Option<S>,
    kill: KillSwitch,
}

impl<T: Transport, S: Service> EngineBuilder<T, S> {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            topology: Topology::default(),
            transport: None,
            service: None,
            kill: KillSwitch::new(),
        }
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn service(mut self, service: S) -> Self {
        self.service = Some(service);
        self
    }

    /// Shares an existing kill switch (for example with a runtime's
    /// shutdown handle).
    pub fn kill_switch(mut self, kill: KillSwitch) -> Self {
        self.kill = kill;
        self
    }

    /// Builds the engine.
    ///
    /// Fails if the transport or the application service is missing; a node
    /// without a service cannot take over for anyone and must not start.
    pub fn build(self) -> FailoverResult<Engine<T, S>> {
        let service = self.service.ok_or(FailoverError::MissingService)?;
        let transport = self.transport.ok_or(FailoverError::MissingTransport)?;

        let mut identity = IdentityRegistry::new(self.config.local.clone());
        let mut dependents = RoleSet::new(Role::Dependents);
        let mut fail_rec = RoleSet::new(Role::FailRec);
        let mut fail_to = RoleSet::new(Role::FailTo);

        for (set, addrs) in [
            (&mut dependents, &self.topology.dependents),
            (&mut fail_rec, &self.topology.fail_rec),
            (&mut fail_to, &self.topology.fail_to),
        ] {
            for addr in addrs {
                let peer = identity.resolve(addr);
                if peer.is_self() {
                    warn!(role = %set.role(), %addr, "ignoring local address in topology");
                    continue;
                }
                set.insert(peer, addr.clone());
            }
        }

        debug!(
            fail_to = fail_to.len(),
            fail_rec = fail_rec.len(),
            dependents = dependents.len(),
            "engine topology loaded"
        );

        Ok(Engine {
            config: self.config,
            dead: DeadLedger::new(),
            dependents,
            identity,
            pending: PendingProbes::new(),
            backups: BackupStore::new(),
            fail_rec,
            fail_to,
            connections: ConnectionTable::new(),
            transport,
            service,
            kill: self.kill,
            alive: true,
            last_inbound: None,
            last_backup_stamp: None,
        })
    }
}
