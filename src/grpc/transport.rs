use std::collections::HashMap;
use tonic::transport::{Channel, Endpoint};

use crate::config::PeerConfig;
use crate::error::{RaftError, Result};
use crate::grpc::proto::raft_service_client::RaftServiceClient;
use crate::raft::rpc::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::Transport;

/// `Transport` over tonic, one lazily connected channel per peer.
///
/// Channels reconnect on their own, so a peer that is down at startup or
/// restarts later is picked up without any bookkeeping here.
pub struct GrpcTransport {
    peers: HashMap<u64, RaftServiceClient<Channel>>,
}

impl GrpcTransport {
    /// Must be called inside a tokio runtime.
    pub fn new(peers: &[PeerConfig]) -> Result<Self> {
        let mut clients = HashMap::new();
        for peer in peers {
            let addr = format!("http://{}", peer.addr);
            let channel = Endpoint::from_shared(addr.clone())?.connect_lazy();
            tracing::info!(peer_id = peer.node_id, addr = %addr, "Configured peer");
            clients.insert(peer.node_id, RaftServiceClient::new(channel));
        }
        Ok(Self { peers: clients })
    }

    fn client(&self, peer_id: u64) -> Result<RaftServiceClient<Channel>> {
        self.peers
            .get(&peer_id)
            .cloned()
            .ok_or(RaftError::Unreachable(peer_id))
    }
}

#[tonic::async_trait]
impl Transport for GrpcTransport {
    async fn request_vote(&self, peer_id: u64, req: VoteRequest) -> Result<VoteResponse> {
        let mut client = self.client(peer_id)?;
        let response = client.request_vote(crate::grpc::proto::VoteRequest::from(req)).await?;
        Ok(response.into_inner().into())
    }

    async fn append_entries(
        &self,
        peer_id: u64,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let mut client = self.client(peer_id)?;
        let response = client
            .append_entries(crate::grpc::proto::AppendEntriesRequest::from(req))
            .await?;
        Ok(response.into_inner().into())
    }
}
