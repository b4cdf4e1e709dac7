use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RaftError, Result};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: u64,
    pub listen_addr: SocketAddr,
    pub peers: Vec<PeerConfig>,
    /// Minimum election timeout. A uniformly random jitter is added on top.
    pub election_timeout_base_ms: u64,
    pub election_timeout_jitter_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Upper bound on a single RequestVote or AppendEntries exchange.
    pub rpc_timeout_ms: u64,
    /// Largest number of entries shipped in one AppendEntries request.
    pub max_entries_per_append: usize,
    /// Capacity of the apply channel. A full channel blocks the apply loop.
    pub apply_buffer: usize,
    /// Where `FilePersister` keeps term, vote and log. `None` keeps them in memory.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub node_id: u64,
    pub addr: String, // host:port format, supports both IP and hostnames
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            peers: Vec::new(),
            election_timeout_base_ms: 650,
            election_timeout_jitter_ms: 150,
            heartbeat_interval_ms: 100,
            rpc_timeout_ms: 100,
            max_entries_per_append: 64,
            apply_buffer: 128,
            data_dir: None,
        }
    }
}

impl PeerConfig {
    /// Parse a comma-separated `id:host:port` list, e.g.
    /// `"2:127.0.0.1:50052,3:node3:50053"`.
    ///
    /// Any malformed entry fails the whole list: silently dropping a peer
    /// would shrink the quorum this node computes.
    pub fn parse_list(peers: &str) -> Result<Vec<PeerConfig>> {
        let peers = peers.trim();
        if peers.is_empty() {
            return Ok(Vec::new());
        }
        peers.split(',').map(|entry| Self::parse(entry.trim())).collect()
    }

    fn parse(entry: &str) -> Result<PeerConfig> {
        let invalid = || {
            RaftError::InvalidConfig(format!(
                "invalid peer '{}', expected id:host:port",
                entry
            ))
        };

        let (id, addr) = entry.split_once(':').ok_or_else(invalid)?;
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        let node_id = id.parse::<u64>().map_err(|_| invalid())?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(invalid());
        }

        Ok(PeerConfig {
            node_id,
            addr: addr.to_string(),
        })
    }
}

impl NodeConfig {
    pub fn new(node_id: u64, listen_addr: SocketAddr) -> Self {
        Self {
            node_id,
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, node_id: u64, addr: String) -> Self {
        self.peers.push(PeerConfig { node_id, addr });
        self
    }

    pub fn peer_ids(&self) -> Vec<u64> {
        self.peers.iter().map(|p| p.node_id).collect()
    }

    /// Number of voting members, this node included.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Reject settings that would break elections or replication.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(RaftError::InvalidConfig(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval_ms >= self.election_timeout_base_ms {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat interval ({}ms) must be shorter than the election timeout ({}ms)",
                self.heartbeat_interval_ms, self.election_timeout_base_ms
            )));
        }
        if self.max_entries_per_append == 0 {
            return Err(RaftError::InvalidConfig(
                "max_entries_per_append must be positive".to_string(),
            ));
        }
        if self.apply_buffer == 0 {
            return Err(RaftError::InvalidConfig(
                "apply_buffer must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.node_id == self.node_id {
                return Err(RaftError::InvalidConfig(format!(
                    "node {} lists itself as a peer",
                    self.node_id
                )));
            }
            if !seen.insert(peer.node_id) {
                return Err(RaftError::InvalidConfig(format!(
                    "duplicate peer id {}",
                    peer.node_id
                )));
            }
        }
        Ok(())
    }
}
