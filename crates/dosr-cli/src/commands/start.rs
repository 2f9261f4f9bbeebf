//! Start command - runs a failover node.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use dosr_config::{DosrConfig, TopologyFile};
use dosr_failover::EngineConfig;
use dosr_server::{Server, ServerConfig};
use dosr_types::Topology;
use tracing::{info, warn};

use crate::service::MemoryService;

pub struct StartArgs {
    pub project: PathBuf,
    pub config: Option<PathBuf>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub topology: Option<PathBuf>,
    pub no_self_detect: bool,
}

pub fn run(args: &StartArgs) -> Result<()> {
    let mut config = super::merge_config(&args.project, args.config.as_deref())?;
    apply_overrides(&mut config, args);
    config
        .validate()
        .context("Configuration failed validation")?;

    let local = config.local_addr();
    let topology = load_topology(&config)?;
    let bind_addr = resolve(&config)?;

    println!();
    println!("dosr - peer failover");
    println!();
    println!("  Node:          {local}");
    println!("  Bind address:  {bind_addr}");
    println!("  Topology:      {}", config.topology.file.display());
    println!("  Fails over to: {}", topology.fail_to.len());
    println!("  Stands by for: {}", topology.fail_rec.len());
    println!("  Dependents:    {}", topology.dependents.len());

    let server_config = ServerConfig::new(bind_addr)
        .with_tick_interval(config.heartbeat_interval())
        .with_connect_timeout(config.connect_timeout())
        .with_buffer_size(config.network.read_buffer_size)
        .with_max_connections(config.network.max_connections)
        .with_max_frame_size(config.network.max_frame_size);
    let engine_config = EngineConfig::new(local)
        .with_failover_timeout(config.failover_timeout())
        .with_force_backup_interval(config.force_backup_interval())
        .with_self_failure_detection(config.failover.detect_self_failure);

    let server = Server::new(server_config, engine_config, topology, MemoryService::new())
        .context("Failed to create server")?;
    #[cfg(unix)]
    let mut server = server
        .with_signal_handling()
        .context("Failed to install signal handlers")?;
    #[cfg(not(unix))]
    let mut server = server;

    println!();
    println!("Node is running. Press Ctrl+C to stop.");
    println!();

    server.run().context("Server error during operation")?;

    println!();
    println!("Node stopped.");
    Ok(())
}

fn apply_overrides(config: &mut DosrConfig, args: &StartArgs) {
    if let Some(address) = &args.address {
        config.node.address.clone_from(address);
    }
    if let Some(port) = args.port {
        config.node.port = port;
    }
    if let Some(file) = &args.topology {
        config.topology.file.clone_from(file);
    }
    if args.no_self_detect {
        config.failover.detect_self_failure = false;
    }
}

/// Reads this node's roles; a missing file means a node with no peers.
fn load_topology(config: &DosrConfig) -> Result<Topology> {
    let path = &config.topology.file;
    if !path.exists() {
        warn!(path = %path.display(), "no topology file, starting without peers");
        return Ok(Topology::default());
    }
    let file = TopologyFile::load(path)
        .with_context(|| format!("Failed to load topology from {}", path.display()))?;
    let topology = file.topology_for(&config.local_addr())?;
    info!(
        fail_to = topology.fail_to.len(),
        fail_rec = topology.fail_rec.len(),
        dependents = topology.dependents.len(),
        "topology loaded"
    );
    Ok(topology)
}

fn resolve(config: &DosrConfig) -> Result<SocketAddr> {
    let (host, port) = (config.node.address.as_str(), config.node.port);
    let mut addrs = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {host}:{port}"))?;
    match addrs.next() {
        Some(addr) => Ok(addr),
        None => bail!("{host}:{port} did not resolve to any address"),
    }
}
