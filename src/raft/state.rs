use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use crate::raft::log::{LogEntry, RaftLog};
use crate::raft::persist::PersistentState;

/// Raft node role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

impl RaftRole {
    /// Role transition table.
    ///
    /// Follower -> Follower covers adopting a higher term, Candidate ->
    /// Candidate a split-vote retry. A leader can only ever step down.
    pub fn can_transition_to(self, next: RaftRole) -> bool {
        use RaftRole::*;
        matches!(
            (self, next),
            (Follower, Follower)
                | (Follower, Candidate)
                | (Candidate, Candidate)
                | (Candidate, Leader)
                | (Candidate, Follower)
                | (Leader, Follower)
        )
    }
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

/// Leader-side view of one follower's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerProgress {
    /// Next index to send.
    pub next_index: u64,
    /// Highest index known to be replicated on the peer.
    pub match_index: u64,
}

/// Strict majority of a cluster of `cluster_size` voters.
pub fn quorum(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

/// New `next_index` after a rejected AppendEntries.
///
/// Halves the gap between `next_index` and `match_index` instead of stepping
/// back one entry at a time, and jumps to the follower's conflict hint when
/// that lies further back. Never goes below `match_index + 1`.
pub fn back_off(next_index: u64, match_index: u64, conflict_hint: Option<u64>) -> u64 {
    let floor = match_index + 1;
    let gap = next_index.saturating_sub(match_index);
    let mut next = next_index.saturating_sub(gap / 2 + 1);
    if let Some(hint) = conflict_hint {
        if hint > match_index {
            next = next.min(hint);
        }
    }
    next.max(floor)
}

/// State shared by every task of one node, always accessed under its lock.
///
/// # Raft Safety Invariants
///
/// ## Election Safety
/// At most one leader per term: `voted_for` allows one vote per term and a
/// candidate needs a strict majority (`quorum`).
///
/// ## Leader Append-Only
/// Leaders only append via `append_command()`. Truncation happens on
/// followers through `RaftLog::merge`.
///
/// ## Log Matching
/// The AppendEntries consistency check (`prev_log_index`, `prev_log_term`)
/// and conflict truncation keep any two logs identical up to a shared
/// (index, term) pair.
///
/// ## Leader Completeness
/// Votes go only to candidates with an up-to-date log (`is_log_up_to_date`),
/// and `advance_commit_index` only commits entries of the current term.
///
/// ## State Machine Safety
/// Only committed entries are applied (`last_applied <= commit_index`).
#[derive(Debug)]
pub struct RaftState {
    // Persistent state
    pub current_term: u64,
    pub voted_for: Option<u64>,
    pub log: RaftLog,

    // Volatile state on all servers
    pub commit_index: u64,
    pub last_applied: u64,

    pub role: RaftRole,
    pub leader_id: Option<u64>,

    // Candidate only: distinct voters in the current election, self included
    pub votes: HashSet<u64>,

    // Leader only: discarded on every role change
    pub progress: HashMap<u64, PeerProgress>,

    // Term, vote or log changed since the last successful save
    unsaved: bool,

    election_reset_at: Instant,
    election_timeout: Duration,
}

impl RaftState {
    pub fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            log: RaftLog::new(),
            commit_index: 0,
            last_applied: 0,
            role: RaftRole::Follower,
            leader_id: None,
            votes: HashSet::new(),
            progress: HashMap::new(),
            unsaved: false,
            election_reset_at: Instant::now(),
            election_timeout: Duration::ZERO,
        }
    }

    /// State recovered from a persister.
    pub fn restore(persisted: PersistentState) -> Self {
        let mut state = Self::new();
        state.current_term = persisted.current_term;
        state.voted_for = persisted.voted_for;
        state.log = RaftLog::from_entries(persisted.log);
        state
    }

    pub fn persistent_state(&self) -> PersistentState {
        PersistentState {
            current_term: self.current_term,
            voted_for: self.voted_for,
            log: self.log.entries().to_vec(),
        }
    }

    /// Whether term, vote or log may differ from what the persister holds.
    pub fn is_unsaved(&self) -> bool {
        self.unsaved
    }

    pub fn mark_unsaved(&mut self) {
        self.unsaved = true;
    }

    pub fn mark_saved(&mut self) {
        self.unsaved = false;
    }

    pub fn last_log_index(&self) -> u64 {
        self.log.last_index()
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last_term()
    }

    /// Check if candidate's log is at least as up-to-date as ours
    pub fn is_log_up_to_date(&self, last_log_index: u64, last_log_term: u64) -> bool {
        let our_last_term = self.last_log_term();
        last_log_term > our_last_term
            || (last_log_term == our_last_term && last_log_index >= self.last_log_index())
    }

    /// Apply a role change if the transition table allows it.
    ///
    /// Leaving the leader role drops all per-peer progress; leaving the
    /// candidate role drops the vote tally.
    pub fn update_role(&mut self, next: RaftRole) -> bool {
        if !self.role.can_transition_to(next) {
            return false;
        }
        if self.role == RaftRole::Leader && next != RaftRole::Leader {
            self.progress.clear();
        }
        if next != RaftRole::Candidate {
            self.votes.clear();
        }
        self.role = next;
        true
    }

    /// Step down if `term` is newer than ours.
    ///
    /// Adopts the term, clears the vote and becomes follower. Returns true
    /// when that happened. Every inbound request and every reply goes
    /// through here first.
    pub fn convert_role(&mut self, term: u64) -> bool {
        if term <= self.current_term {
            return false;
        }
        self.current_term = term;
        self.voted_for = None;
        self.leader_id = None;
        self.update_role(RaftRole::Follower);
        true
    }

    /// Yield to a leader of our own term. The vote of this term is kept.
    pub fn become_follower(&mut self, leader_id: u64) {
        self.update_role(RaftRole::Follower);
        self.leader_id = Some(leader_id);
    }

    /// Start a new election: next term, vote for self.
    pub fn become_candidate(&mut self, my_id: u64) {
        self.update_role(RaftRole::Candidate);
        self.current_term += 1;
        self.voted_for = Some(my_id);
        self.votes.clear();
        self.votes.insert(my_id);
        self.leader_id = None;
    }

    /// Count a granted vote. Repeated replies from one voter count once.
    pub fn record_vote(&mut self, voter: u64) -> usize {
        self.votes.insert(voter);
        self.votes.len()
    }

    /// Take leadership and reset per-peer progress.
    pub fn become_leader(&mut self, my_id: u64, peer_ids: &[u64]) -> bool {
        if !self.update_role(RaftRole::Leader) {
            return false;
        }
        self.leader_id = Some(my_id);

        let next_index = self.last_log_index() + 1;
        self.progress = peer_ids
            .iter()
            .map(|&peer_id| {
                (
                    peer_id,
                    PeerProgress {
                        next_index,
                        match_index: 0,
                    },
                )
            })
            .collect();
        true
    }

    /// Append a client command in the current term. Returns its index.
    pub fn append_command(&mut self, command: Vec<u8>) -> u64 {
        let term = self.current_term;
        self.log.append(LogEntry::new(term, command))
    }

    /// Record a successful AppendEntries covering the log up to `matched`.
    pub fn record_match(&mut self, peer_id: u64, matched: u64) {
        if let Some(progress) = self.progress.get_mut(&peer_id) {
            progress.match_index = progress.match_index.max(matched);
            progress.next_index = progress.match_index + 1;
        }
    }

    /// Step `next_index` back after a log mismatch.
    pub fn back_off_next_index(&mut self, peer_id: u64, conflict_hint: Option<u64>) {
        if let Some(progress) = self.progress.get_mut(&peer_id) {
            progress.next_index =
                back_off(progress.next_index, progress.match_index, conflict_hint);
        }
    }

    /// Move `commit_index` to the highest current-term index replicated on a
    /// majority (the leader counts itself).
    ///
    /// Scans from the end of the log and stops at the first entry of an
    /// earlier term: those are committed only indirectly, once a later
    /// current-term entry commits. Returns the new commit index if it moved.
    pub fn advance_commit_index(&mut self, cluster_size: usize) -> Option<u64> {
        if self.role != RaftRole::Leader {
            return None;
        }
        let needed = quorum(cluster_size);
        let mut index = self.last_log_index();
        while index > self.commit_index && self.log.term_at(index) == Some(self.current_term) {
            let replicas = 1 + self
                .progress
                .values()
                .filter(|p| p.match_index >= index)
                .count();
            if replicas >= needed {
                self.commit_index = index;
                return Some(index);
            }
            index -= 1;
        }
        None
    }

    /// Next committed entry still waiting to be applied.
    pub fn next_to_apply(&self) -> Option<(u64, &LogEntry)> {
        if self.last_applied >= self.commit_index {
            return None;
        }
        let index = self.last_applied + 1;
        self.log.get(index).map(|entry| (index, entry))
    }

    pub fn mark_applied(&mut self, index: u64) {
        self.last_applied = self.last_applied.max(index);
    }

    /// Re-arm the election timer with a fresh timeout.
    pub fn reset_election_timer(&mut self, timeout: Duration) {
        self.election_reset_at = Instant::now();
        self.election_timeout = timeout;
    }

    pub fn election_deadline(&self) -> Instant {
        self.election_reset_at + self.election_timeout
    }
}

impl Default for RaftState {
    fn default() -> Self {
        Self::new()
    }
}
