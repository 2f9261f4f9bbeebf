//! Topology command - parses a topology file and prints the roles it assigns.

use std::path::Path;

use anyhow::{Context, Result};
use dosr_config::TopologyFile;
use dosr_types::{PeerAddr, Topology};

pub fn run(file: &Path, node: Option<&str>) -> Result<()> {
    let topology = TopologyFile::load(file)
        .with_context(|| format!("Failed to load topology from {}", file.display()))?;

    if let Some(node) = node {
        let local: PeerAddr = node.parse()?;
        let roles = topology.topology_for(&local)?;
        println!("Node {local}");
        print_roles(&roles);
        return Ok(());
    }

    println!("{} node(s) in {}", topology.entries().len(), file.display());
    for entry in topology.entries() {
        let roles = topology.topology_for(&entry.addr)?;
        println!();
        println!("Node {} (line {})", entry.addr, entry.line);
        print_roles(&roles);
    }
    Ok(())
}

fn print_roles(roles: &Topology) {
    println!("  Stands by for: {}", join(&roles.fail_rec));
    println!("  Fails over to: {}", join(&roles.fail_to));
    println!("  Dependents:    {}", join(&roles.dependents));
}

fn join(addrs: &[PeerAddr]) -> String {
    if addrs.is_empty() {
        return "-".to_string();
    }
    addrs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
