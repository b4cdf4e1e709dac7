use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::error::RaftError;
use crate::grpc::proto::client_service_server::ClientService as ClientServiceApi;
use crate::grpc::proto::{StatusRequest, StatusResponse, SubmitRequest, SubmitResponse};
use crate::grpc::to_status;
use crate::raft::RaftNode;

/// Client-facing gRPC service: command submission and node status.
pub struct ClientService {
    raft_node: Arc<RaftNode>,
}

impl ClientService {
    pub fn new(raft_node: Arc<RaftNode>) -> Self {
        Self { raft_node }
    }
}

#[tonic::async_trait]
impl ClientServiceApi for ClientService {
    async fn submit(
        &self,
        request: Request<SubmitRequest>,
    ) -> Result<Response<SubmitResponse>, Status> {
        let req = request.into_inner();

        if req.command.is_empty() {
            return Err(Status::invalid_argument("Command cannot be empty"));
        }

        // Not being the leader is an ordinary answer, not an RPC failure:
        // the client retries against `leader_id`.
        match self.raft_node.submit(req.command).await {
            Ok((index, term)) => {
                tracing::info!(index, term, "Command submitted");
                Ok(Response::new(SubmitResponse {
                    index,
                    term,
                    is_leader: true,
                    leader_id: Some(self.raft_node.id),
                }))
            }
            Err(RaftError::NotLeader { leader_id, term }) => Ok(Response::new(SubmitResponse {
                index: 0,
                term,
                is_leader: false,
                leader_id,
            })),
            Err(e) => Err(to_status(e)),
        }
    }

    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let status = self.raft_node.status().await;
        Ok(Response::new(StatusResponse {
            node_id: status.node_id,
            role: status.role.to_string(),
            term: status.term,
            leader_id: status.leader_id,
            commit_index: status.commit_index,
            last_applied: status.last_applied,
            last_log_index: status.last_log_index,
        }))
    }
}
