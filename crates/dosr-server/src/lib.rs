//! # dosr-server: failover node runtime
//!
//! Hosts a [`dosr_failover::Engine`] on real sockets.
//!
//! ## Architecture
//!
//! The server uses `mio` for non-blocking I/O with a poll-based event loop.
//! One thread owns the engine; there is no async runtime and no lock around
//! the coordination registries.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         dosr-server                           │
//! │  ┌────────────┐   ┌──────────────┐   ┌────────────────────┐   │
//! │  │  Listener  │ → │ MioTransport │ → │       Engine       │   │
//! │  │   (TCP)    │   │  (mio poll)  │   │ (dosr-failover)    │   │
//! │  └────────────┘   └──────────────┘   └────────────────────┘   │
//! │          tick: heartbeat cycle, then backup cycle             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use dosr_failover::EngineConfig;
//! use dosr_server::{Server, ServerConfig};
//! use dosr_types::{PeerAddr, Topology};
//!
//! let config = ServerConfig::new(([0, 0, 0, 0], 9000));
//! let engine = EngineConfig::new(PeerAddr::new("10.0.0.1", 9000));
//! let mut server = Server::new(config, engine, Topology::default(), my_service)?;
//! let handle = server.shutdown_handle();
//! server.run()?;
//! ```

mod config;
mod connection;
mod error;
mod server;
mod transport;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{Server, ShutdownHandle};
pub use transport::{ConnectProgress, Inbound, MioTransport, WRITE_BUFFER_FRAMES};
