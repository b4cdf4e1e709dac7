pub mod apply;
mod election;
pub mod log;
pub mod node;
pub mod persist;
mod replication;
pub mod rpc;
pub mod state;
pub mod timer;
pub mod transport;

pub use apply::ApplyMsg;
pub use log::{LogEntry, RaftLog};
pub use node::{NodeStatus, RaftNode};
pub use persist::{FilePersister, MemoryPersister, PersistentState, Persister};
pub use state::{RaftRole, RaftState};
pub use transport::{LocalNetwork, LocalTransport, Transport};
