pub mod config;
pub mod error;
pub mod grpc;
pub mod raft;
pub mod shutdown;

pub use config::{NodeConfig, PeerConfig};
pub use error::{RaftError, Result};
pub use raft::{ApplyMsg, RaftNode, RaftRole};
