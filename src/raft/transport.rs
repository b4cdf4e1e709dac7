use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;

use crate::error::{RaftError, Result};
use crate::raft::node::RaftNode;
use crate::raft::rpc::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};

/// Point-to-point RPC to the other members of the cluster.
///
/// An `Err` means "no answer": the request or its reply may or may not have
/// been delivered. Callers treat it as a dropped packet and retry later.
#[tonic::async_trait]
pub trait Transport: Send + Sync {
    async fn request_vote(&self, peer_id: u64, req: VoteRequest) -> Result<VoteResponse>;

    async fn append_entries(
        &self,
        peer_id: u64,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;
}

/// In-process network connecting `RaftNode`s directly.
///
/// Each node talks through a `LocalTransport` bound to its own id. Links can
/// be cut per node or by partition, and requests can be duplicated to
/// exercise retransmission handling.
#[derive(Default)]
pub struct LocalNetwork {
    nodes: RwLock<HashMap<u64, Weak<RaftNode>>>,
    /// Nodes cut off from everyone.
    isolated: RwLock<HashSet<u64>>,
    /// When set, only nodes in the same group can talk.
    groups: RwLock<Option<Vec<HashSet<u64>>>>,
    duplicate: AtomicBool,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport endpoint for `node_id`.
    pub fn transport(self: &Arc<Self>, node_id: u64) -> Arc<LocalTransport> {
        Arc::new(LocalTransport {
            node_id,
            network: self.clone(),
        })
    }

    /// Attach (or re-attach after a restart) the node serving `node.id`.
    pub async fn register(&self, node: &Arc<RaftNode>) {
        self.nodes
            .write()
            .await
            .insert(node.id, Arc::downgrade(node));
    }

    pub async fn unregister(&self, node_id: u64) {
        self.nodes.write().await.remove(&node_id);
    }

    /// Cut every link of `node_id`.
    pub async fn disconnect(&self, node_id: u64) {
        self.isolated.write().await.insert(node_id);
        tracing::debug!(node_id, "Network: node disconnected");
    }

    pub async fn connect(&self, node_id: u64) {
        self.isolated.write().await.remove(&node_id);
        tracing::debug!(node_id, "Network: node connected");
    }

    /// Only allow traffic inside each group.
    pub async fn partition(&self, groups: &[&[u64]]) {
        let groups = groups
            .iter()
            .map(|g| g.iter().copied().collect::<HashSet<u64>>())
            .collect();
        *self.groups.write().await = Some(groups);
    }

    /// Remove partitions and reconnect every node.
    pub async fn heal(&self) {
        *self.groups.write().await = None;
        self.isolated.write().await.clear();
    }

    /// Deliver every request twice.
    pub fn set_duplicate(&self, duplicate: bool) {
        self.duplicate.store(duplicate, Ordering::SeqCst);
    }

    pub async fn is_reachable(&self, from: u64, to: u64) -> bool {
        {
            let isolated = self.isolated.read().await;
            if isolated.contains(&from) || isolated.contains(&to) {
                return false;
            }
        }
        match self.groups.read().await.as_ref() {
            Some(groups) => groups.iter().any(|g| g.contains(&from) && g.contains(&to)),
            None => true,
        }
    }

    async fn target(&self, from: u64, to: u64) -> Result<Arc<RaftNode>> {
        if !self.is_reachable(from, to).await {
            return Err(RaftError::Unreachable(to));
        }
        self.nodes
            .read()
            .await
            .get(&to)
            .and_then(Weak::upgrade)
            .ok_or(RaftError::Unreachable(to))
    }

    /// Replies are lost if the link went down while the request was handled.
    async fn deliver_reply<T>(&self, from: u64, to: u64, reply: T) -> Result<T> {
        if self.is_reachable(from, to).await {
            Ok(reply)
        } else {
            Err(RaftError::Unreachable(to))
        }
    }
}

/// One node's view of a `LocalNetwork`.
pub struct LocalTransport {
    node_id: u64,
    network: Arc<LocalNetwork>,
}

#[tonic::async_trait]
impl Transport for LocalTransport {
    async fn request_vote(&self, peer_id: u64, req: VoteRequest) -> Result<VoteResponse> {
        let target = self.network.target(self.node_id, peer_id).await?;
        if self.network.duplicate.load(Ordering::SeqCst) {
            let _ = target.handle_vote_request(req.clone()).await;
        }
        let reply = target.handle_vote_request(req).await?;
        self.network.deliver_reply(self.node_id, peer_id, reply).await
    }

    async fn append_entries(
        &self,
        peer_id: u64,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let target = self.network.target(self.node_id, peer_id).await?;
        if self.network.duplicate.load(Ordering::SeqCst) {
            let _ = target.handle_append_entries(req.clone()).await;
        }
        let reply = target.handle_append_entries(req).await?;
        self.network.deliver_reply(self.node_id, peer_id, reply).await
    }
}
