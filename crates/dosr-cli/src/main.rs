//! dosr node CLI.
//!
//! Runs one node of a failover cluster and inspects cluster topology files.
//!
//! # Quick Start
//!
//! ```bash
//! # Check what a node would stand by for and fail over to
//! dosr topology failover.txt --node 10.0.0.1:9000
//!
//! # Run the node (reads dosr.toml and DOSR_* from the environment)
//! dosr start --address 10.0.0.1 --port 9000
//! ```

mod commands;
mod service;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// dosr - peer failover without a central coordinator.
#[derive(Parser)]
#[command(name = "dosr")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Run a failover node.
    Start {
        /// Project directory holding dosr.toml and dosr.local.toml.
        #[arg(short = 'C', long, default_value = ".")]
        project: PathBuf,

        /// Extra config file, layered above the project files.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address this node is known by (overrides node.address).
        #[arg(short, long)]
        address: Option<String>,

        /// Port to listen on (overrides node.port).
        #[arg(short, long)]
        port: Option<u16>,

        /// Topology file (overrides topology.file).
        #[arg(short, long)]
        topology: Option<PathBuf>,

        /// Never fail this node over because of global inbound silence.
        #[arg(long)]
        no_self_detect: bool,
    },

    /// Parse a topology file and show the roles it assigns.
    Topology {
        /// Path to the topology file.
        file: PathBuf,

        /// Show the derived roles of one node (host:port).
        #[arg(short, long)]
        node: Option<String>,
    },

    /// Print the effective configuration as TOML.
    Config {
        /// Project directory holding dosr.toml and dosr.local.toml.
        #[arg(short = 'C', long, default_value = ".")]
        project: PathBuf,

        /// Extra config file, layered above the project files.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Start {
            project,
            config,
            address,
            port,
            topology,
            no_self_detect,
        } => commands::start::run(&commands::start::StartArgs {
            project,
            config,
            address,
            port,
            topology,
            no_self_detect,
        }),
        Commands::Topology { file, node } => commands::topology::run(&file, node.as_deref()),
        Commands::Config { project, config } => commands::config::show(&project, config.as_deref()),
    }
}
