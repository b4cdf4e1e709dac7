use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Not the leader (term {term}), current leader is node {leader_id:?}")]
    NotLeader { leader_id: Option<u64>, term: u64 },

    #[error("Peer {0} is unreachable")]
    Unreachable(u64),

    #[error("RPC timed out")]
    Timeout,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Connection error: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Node is shutting down")]
    Shutdown,
}

impl RaftError {
    /// Whether this error only means "no answer this round" and the caller
    /// should simply retry later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RaftError::Unreachable(_)
                | RaftError::Timeout
                | RaftError::Grpc(_)
                | RaftError::Connect(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RaftError>;
