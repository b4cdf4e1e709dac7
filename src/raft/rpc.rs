use serde::{Deserialize, Serialize};

use crate::raft::log::LogEntry;
use crate::raft::state::{RaftRole, RaftState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: u64,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

impl AppendEntriesRequest {
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the last entry this request covers.
    pub fn last_index(&self) -> u64 {
        self.prev_log_index + self.entries.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
    /// On a log mismatch, where the leader should retry from.
    pub conflict_index: Option<u64>,
}

/// Build the RequestVote a fresh candidate broadcasts.
pub fn vote_request(state: &RaftState, my_id: u64) -> VoteRequest {
    VoteRequest {
        term: state.current_term,
        candidate_id: my_id,
        last_log_index: state.last_log_index(),
        last_log_term: state.last_log_term(),
    }
}

/// Build the next AppendEntries for `peer_id` from the leader's progress.
///
/// Returns `None` if `peer_id` has no progress entry (not leader, or
/// unknown peer).
pub fn append_entries_request(
    state: &RaftState,
    my_id: u64,
    peer_id: u64,
    max_entries: usize,
) -> Option<AppendEntriesRequest> {
    let progress = state.progress.get(&peer_id)?;
    let next_index = progress.next_index.clamp(1, state.last_log_index() + 1);
    let prev_log_index = next_index - 1;

    Some(AppendEntriesRequest {
        term: state.current_term,
        leader_id: my_id,
        prev_log_index,
        prev_log_term: state.log.term_at(prev_log_index).unwrap_or(0),
        entries: state.log.entries_from(next_index, max_entries),
        leader_commit: state.commit_index,
    })
}

/// Handle RequestVote RPC
pub fn handle_request_vote(state: &mut RaftState, req: &VoteRequest, my_id: u64) -> VoteResponse {
    state.convert_role(req.term);

    let vote_granted = if req.term < state.current_term {
        false
    } else if state.voted_for.is_some() && state.voted_for != Some(req.candidate_id) {
        // Already voted for someone else in this term
        false
    } else if !state.is_log_up_to_date(req.last_log_index, req.last_log_term) {
        false
    } else {
        state.voted_for = Some(req.candidate_id);
        true
    };

    tracing::debug!(
        node_id = my_id,
        candidate = req.candidate_id,
        term = req.term,
        granted = vote_granted,
        "RequestVote response"
    );

    VoteResponse {
        term: state.current_term,
        vote_granted,
    }
}

/// Handle AppendEntries RPC
pub fn handle_append_entries(
    state: &mut RaftState,
    req: &AppendEntriesRequest,
    my_id: u64,
) -> AppendEntriesResponse {
    state.convert_role(req.term);

    if req.term < state.current_term {
        return AppendEntriesResponse {
            term: state.current_term,
            success: false,
            conflict_index: None,
        };
    }

    // Valid AppendEntries from the leader of our term
    if state.role != RaftRole::Follower || state.leader_id != Some(req.leader_id) {
        state.become_follower(req.leader_id);
    }

    if !state.log.contains(req.prev_log_index, req.prev_log_term) {
        let conflict_index = match state.log.term_at(req.prev_log_index) {
            None => state.last_log_index() + 1,
            Some(term) => state.log.first_index_of_term(term, req.prev_log_index),
        };
        tracing::debug!(
            node_id = my_id,
            prev_log_index = req.prev_log_index,
            prev_log_term = req.prev_log_term,
            conflict_index,
            "AppendEntries log mismatch"
        );
        return AppendEntriesResponse {
            term: state.current_term,
            success: false,
            conflict_index: Some(conflict_index),
        };
    }

    if state.log.merge(req.prev_log_index, &req.entries) {
        tracing::debug!(
            node_id = my_id,
            entries = req.entries.len(),
            new_last_index = state.last_log_index(),
            "Appended entries"
        );
    }

    // Only entries this request vouches for may be committed here; a
    // reordered shorter request must not lower commit_index either.
    let new_commit = req.leader_commit.min(req.last_index());
    if new_commit > state.commit_index {
        state.commit_index = new_commit;
    }

    AppendEntriesResponse {
        term: state.current_term,
        success: true,
        conflict_index: None,
    }
}
