//! # dosr-failover: Peer failover coordination
//!
//! Detects silent peers, fails traffic over to designated standbys, and
//! replicates application snapshots to failover targets, without a central
//! coordinator.
//!
//! # Architecture
//!
//! ```text
//!            inbound frames                         outbound frames
//!  runtime ─────────────────► ┌──────────────┐ ─────────────────► Transport
//!                             │  Dispatcher  │
//!                             └──────┬───────┘
//!          ┌──────────────┬──────────┼──────────────┬──────────────┐
//!          ▼              ▼          ▼              ▼              ▼
//!     Heartbeat     Coordinator    Backup      Identity /      Service
//!      monitor     (roles, dead)   store      connections   (application)
//! ```
//!
//! [`Engine`] owns every registry. It performs no I/O of its own: sockets
//! sit behind [`Transport`], the hosting application behind [`Service`],
//! and every operation receives the current [`Instant`](std::time::Instant)
//! from the caller. The `dosr-server` crate drives it from a `mio` loop;
//! tests drive it with [`MemoryTransport`] and synthetic clocks.
//!
//! # Roles
//!
//! - **FailTo**: peers this node fails over to.
//! - **FailRec**: peers this node stands by for; their death triggers
//!   [`Service::take_over`].
//! - **Dependents**: peers that fail over to this node; they are told about
//!   every takeover and self-failure.

mod backup;
mod config;
mod connections;
mod coordinator;
mod dispatcher;
mod engine;
mod error;
mod heartbeat;
mod registry;
mod roles;
mod service;
mod transport;

pub use backup::{BackupRecord, BackupStore, MergeOutcome};
pub use config::{DEFAULT_FAILOVER_TIMEOUT, DEFAULT_FORCE_BACKUP_INTERVAL, EngineConfig};
pub use connections::{ConnectionTable, Detached, PeerConnection};
pub use coordinator::{DeadLedger, DeadPeer, DeathOutcome, NoticeOutcome};
pub use engine::{Engine, EngineBuilder, KillSwitch, NodeStatus};
pub use error::{FailoverError, FailoverResult};
pub use heartbeat::{HeartbeatReport, PendingProbe, PendingProbes};
pub use registry::IdentityRegistry;
pub use roles::{Role, RoleEntry, RoleSet};
pub use service::Service;
pub use transport::{ConnId, MemoryTransport, Transport};

#[cfg(test)]
mod tests;
