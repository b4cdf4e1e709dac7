//! Wire messages for the `raft` gRPC package.
//!
//! Messages are declared directly with prost derives; the service stubs are
//! generated by `build.rs`.

use crate::raft::log::LogEntry as RaftLogEntry;
use crate::raft::rpc;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEntry {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub command: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoteRequest {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub candidate_id: u64,
    #[prost(uint64, tag = "3")]
    pub last_log_index: u64,
    #[prost(uint64, tag = "4")]
    pub last_log_term: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoteResponse {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(bool, tag = "2")]
    pub vote_granted: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppendEntriesRequest {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub leader_id: u64,
    #[prost(uint64, tag = "3")]
    pub prev_log_index: u64,
    #[prost(uint64, tag = "4")]
    pub prev_log_term: u64,
    #[prost(message, repeated, tag = "5")]
    pub entries: Vec<LogEntry>,
    #[prost(uint64, tag = "6")]
    pub leader_commit: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppendEntriesResponse {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(bool, tag = "2")]
    pub success: bool,
    #[prost(uint64, optional, tag = "3")]
    pub conflict_index: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub command: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitResponse {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(uint64, tag = "2")]
    pub term: u64,
    #[prost(bool, tag = "3")]
    pub is_leader: bool,
    /// Known leader when `is_leader` is false.
    #[prost(uint64, optional, tag = "4")]
    pub leader_id: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusResponse {
    #[prost(uint64, tag = "1")]
    pub node_id: u64,
    #[prost(string, tag = "2")]
    pub role: String,
    #[prost(uint64, tag = "3")]
    pub term: u64,
    #[prost(uint64, optional, tag = "4")]
    pub leader_id: Option<u64>,
    #[prost(uint64, tag = "5")]
    pub commit_index: u64,
    #[prost(uint64, tag = "6")]
    pub last_applied: u64,
    #[prost(uint64, tag = "7")]
    pub last_log_index: u64,
}

include!(concat!(env!("OUT_DIR"), "/raft.RaftService.rs"));
include!(concat!(env!("OUT_DIR"), "/raft.ClientService.rs"));

impl From<&RaftLogEntry> for LogEntry {
    fn from(entry: &RaftLogEntry) -> Self {
        Self {
            term: entry.term,
            command: entry.command.clone(),
        }
    }
}

impl From<LogEntry> for RaftLogEntry {
    fn from(entry: LogEntry) -> Self {
        RaftLogEntry::new(entry.term, entry.command)
    }
}

impl From<rpc::VoteRequest> for VoteRequest {
    fn from(req: rpc::VoteRequest) -> Self {
        Self {
            term: req.term,
            candidate_id: req.candidate_id,
            last_log_index: req.last_log_index,
            last_log_term: req.last_log_term,
        }
    }
}

impl From<VoteRequest> for rpc::VoteRequest {
    fn from(req: VoteRequest) -> Self {
        Self {
            term: req.term,
            candidate_id: req.candidate_id,
            last_log_index: req.last_log_index,
            last_log_term: req.last_log_term,
        }
    }
}

impl From<rpc::VoteResponse> for VoteResponse {
    fn from(resp: rpc::VoteResponse) -> Self {
        Self {
            term: resp.term,
            vote_granted: resp.vote_granted,
        }
    }
}

impl From<VoteResponse> for rpc::VoteResponse {
    fn from(resp: VoteResponse) -> Self {
        Self {
            term: resp.term,
            vote_granted: resp.vote_granted,
        }
    }
}

impl From<rpc::AppendEntriesRequest> for AppendEntriesRequest {
    fn from(req: rpc::AppendEntriesRequest) -> Self {
        Self {
            term: req.term,
            leader_id: req.leader_id,
            prev_log_index: req.prev_log_index,
            prev_log_term: req.prev_log_term,
            entries: req.entries.iter().map(LogEntry::from).collect(),
            leader_commit: req.leader_commit,
        }
    }
}

impl From<AppendEntriesRequest> for rpc::AppendEntriesRequest {
    fn from(req: AppendEntriesRequest) -> Self {
        Self {
            term: req.term,
            leader_id: req.leader_id,
            prev_log_index: req.prev_log_index,
            prev_log_term: req.prev_log_term,
            entries: req.entries.into_iter().map(RaftLogEntry::from).collect(),
            leader_commit: req.leader_commit,
        }
    }
}

impl From<rpc::AppendEntriesResponse> for AppendEntriesResponse {
    fn from(resp: rpc::AppendEntriesResponse) -> Self {
        Self {
            term: resp.term,
            success: resp.success,
            conflict_index: resp.conflict_index,
        }
    }
}

impl From<AppendEntriesResponse> for rpc::AppendEntriesResponse {
    fn from(resp: AppendEntriesResponse) -> Self {
        Self {
            term: resp.term,
            success: resp.success,
            conflict_index: resp.conflict_index,
        }
    }
}
