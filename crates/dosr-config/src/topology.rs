//! Startup failover topology file.
//!
//! One line per node:
//!
//! ```text
//! <addr> <port> fail_rec <addr> <port> ... fail_to <addr> <port> ...
//! ```
//!
//! `fail_rec` lists the peers the line's node stands by for, `fail_to` the
//! peers it fails over to (in preference order). Either section may be
//! omitted. Blank lines and `#` comments are ignored.
//!
//! A node's dependents are not written down: they are the other lines whose
//! `fail_to` list names the node.

use std::path::Path;
use std::str::FromStr;

use dosr_types::{PeerAddr, Topology};

use crate::TopologyError;

const FAIL_REC: &str = "fail_rec";
const FAIL_TO: &str = "fail_to";

/// One parsed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEntry {
    pub addr: PeerAddr,
    pub fail_rec: Vec<PeerAddr>,
    pub fail_to: Vec<PeerAddr>,
    /// 1-based line number in the source text.
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyFile {
    entries: Vec<TopologyEntry>,
}

impl TopologyFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TopologyError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    pub fn entries(&self) -> &[TopologyEntry] {
        &self.entries
    }

    /// Finds the line describing `local`: an exact address and port match,
    /// or failing that the first line with the same host.
    pub fn entry_for(&self, local: &PeerAddr) -> Option<&TopologyEntry> {
        self.entries
            .iter()
            .find(|e| &e.addr == local)
            .or_else(|| self.entries.iter().find(|e| e.addr.host() == local.host()))
    }

    /// Builds the role lists for `local`.
    pub fn topology_for(&self, local: &PeerAddr) -> Result<Topology, TopologyError> {
        let own = self
            .entry_for(local)
            .ok_or_else(|| TopologyError::NodeNotFound {
                addr: local.to_string(),
            })?;

        let dependents = self
            .entries
            .iter()
            .filter(|e| e.line != own.line && e.fail_to.contains(&own.addr))
            .map(|e| e.addr.clone())
            .collect();

        Ok(Topology {
            fail_rec: own.fail_rec.clone(),
            fail_to: own.fail_to.clone(),
            dependents,
        })
    }
}

impl FromStr for TopologyFile {
    type Err = TopologyError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let content = raw.split_once('#').map_or(raw, |(before, _)| before);
            let tokens: Vec<&str> = content.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            entries.push(parse_line(line, &tokens)?);
        }
        Ok(Self { entries })
    }
}

fn parse_line(line: usize, tokens: &[&str]) -> Result<TopologyEntry, TopologyError> {
    let [host, port, rest @ ..] = tokens else {
        return Err(TopologyError::syntax(line, "expected '<addr> <port>'"));
    };
    if is_keyword(host) {
        return Err(TopologyError::syntax(line, "line must start with the node address"));
    }
    let addr = PeerAddr::new(*host, parse_port(line, port)?);

    let mut fail_rec = None;
    let mut fail_to = None;
    let mut rest = rest;
    while let [keyword, tail @ ..] = rest {
        let section_len = tail.iter().position(|t| is_keyword(t)).unwrap_or(tail.len());
        let peers = parse_peers(line, keyword, &tail[..section_len])?;
        let slot = match *keyword {
            FAIL_REC => &mut fail_rec,
            FAIL_TO => &mut fail_to,
            other => {
                return Err(TopologyError::syntax(
                    line,
                    format!("unexpected '{other}', expected '{FAIL_REC}' or '{FAIL_TO}'"),
                ));
            }
        };
        if slot.replace(peers).is_some() {
            return Err(TopologyError::syntax(line, format!("'{keyword}' appears twice")));
        }
        rest = &tail[section_len..];
    }

    Ok(TopologyEntry {
        addr,
        fail_rec: fail_rec.unwrap_or_default(),
        fail_to: fail_to.unwrap_or_default(),
        line,
    })
}

fn parse_peers(line: usize, keyword: &str, tokens: &[&str]) -> Result<Vec<PeerAddr>, TopologyError> {
    if tokens.len() % 2 != 0 {
        return Err(TopologyError::syntax(
            line,
            format!("'{keyword}' needs '<addr> <port>' pairs"),
        ));
    }
    tokens
        .chunks_exact(2)
        .map(|pair| Ok(PeerAddr::new(pair[0], parse_port(line, pair[1])?)))
        .collect()
}

fn parse_port(line: usize, token: &str) -> Result<u16, TopologyError> {
    token
        .parse()
        .map_err(|_| TopologyError::syntax(line, format!("invalid port '{token}'")))
}

fn is_keyword(token: &str) -> bool {
    token == FAIL_REC || token == FAIL_TO
}
