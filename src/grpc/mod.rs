pub mod client_service;
pub mod cluster_service;
pub mod proto;
pub mod server;
pub mod transport;

pub use server::GrpcServer;
pub use transport::GrpcTransport;

use tonic::Status;

use crate::error::RaftError;

/// Map a node error onto a gRPC status. Errors while serving a peer RPC
/// look like a lost message to the caller.
pub(crate) fn to_status(err: RaftError) -> Status {
    match err {
        RaftError::Shutdown => Status::unavailable(err.to_string()),
        RaftError::Grpc(status) => status,
        other => Status::internal(other.to_string()),
    }
}
