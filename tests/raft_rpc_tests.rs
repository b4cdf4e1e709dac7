use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use raft_lite::config::NodeConfig;
use raft_lite::raft::rpc::{
    handle_append_entries, handle_request_vote, AppendEntriesRequest, VoteRequest,
};
use raft_lite::raft::{
    LocalNetwork, LogEntry, MemoryPersister, PersistentState, Persister, RaftNode, RaftRole,
    RaftState,
};
use raft_lite::RaftError;

fn test_node(persister: Arc<dyn Persister>) -> RaftNode {
    let network = LocalNetwork::new();
    let (raft_node, _rx) =
        RaftNode::new(NodeConfig::default(), network.transport(1), persister).unwrap();
    raft_node
}

fn heartbeat(term: u64, leader_id: u64, prev: (u64, u64), leader_commit: u64) -> AppendEntriesRequest {
    AppendEntriesRequest {
        term,
        leader_id,
        prev_log_index: prev.0,
        prev_log_term: prev.1,
        entries: vec![],
        leader_commit,
    }
}

/// Persister whose writes always fail.
struct BrokenDisk;

impl Persister for BrokenDisk {
    fn save(&self, _state: &PersistentState) -> raft_lite::Result<()> {
        Err(RaftError::Storage("disk unavailable".to_string()))
    }

    fn load(&self) -> raft_lite::Result<Option<PersistentState>> {
        Ok(None)
    }
}

/// Persister that fails its first `failures` writes, then stores normally.
struct FlakyDisk {
    failures: AtomicUsize,
    inner: MemoryPersister,
}

impl FlakyDisk {
    fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            inner: MemoryPersister::new(),
        })
    }
}

impl Persister for FlakyDisk {
    fn save(&self, state: &PersistentState) -> raft_lite::Result<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(RaftError::Storage("disk full".to_string()));
        }
        self.inner.save(state)
    }

    fn load(&self) -> raft_lite::Result<Option<PersistentState>> {
        self.inner.load()
    }
}

#[test]
fn test_request_vote_grant_vote() {
    let mut state = RaftState::new();
    state.current_term = 1;

    let req = VoteRequest {
        term: 2,
        candidate_id: 2,
        last_log_index: 0,
        last_log_term: 0,
    };

    let resp = handle_request_vote(&mut state, &req, 1);

    assert!(resp.vote_granted);
    assert_eq!(resp.term, 2);
    assert_eq!(state.voted_for, Some(2));
}

#[test]
fn test_request_vote_reject_stale_term() {
    let mut state = RaftState::new();
    state.current_term = 5;

    let req = VoteRequest {
        term: 3, // Lower than current term
        candidate_id: 2,
        last_log_index: 0,
        last_log_term: 0,
    };

    let resp = handle_request_vote(&mut state, &req, 1);

    assert!(!resp.vote_granted);
    assert_eq!(resp.term, 5);
    assert_eq!(state.voted_for, None);
}

#[test]
fn test_request_vote_reject_already_voted() {
    let mut state = RaftState::new();
    state.current_term = 2;
    state.voted_for = Some(3); // Already voted for node 3

    let req = VoteRequest {
        term: 2,
        candidate_id: 2, // Different candidate
        last_log_index: 0,
        last_log_term: 0,
    };

    let resp = handle_request_vote(&mut state, &req, 1);

    assert!(!resp.vote_granted);
    assert_eq!(state.voted_for, Some(3));
}

#[test]
fn test_request_vote_same_candidate_again() {
    let mut state = RaftState::new();
    state.current_term = 2;
    state.voted_for = Some(2);

    let req = VoteRequest {
        term: 2,
        candidate_id: 2,
        last_log_index: 0,
        last_log_term: 0,
    };

    // A retransmitted request from the candidate we already voted for
    let resp = handle_request_vote(&mut state, &req, 1);
    assert!(resp.vote_granted);
}

#[test]
fn test_request_vote_reject_outdated_log() {
    let mut state = RaftState::new();
    state.current_term = 2;
    state.log.append(LogEntry::new(2, "x"));

    let req = VoteRequest {
        term: 3,
        candidate_id: 2,
        last_log_index: 0, // Candidate has no logs
        last_log_term: 0,
    };

    let resp = handle_request_vote(&mut state, &req, 1);

    assert!(!resp.vote_granted);
    // The higher term is still adopted
    assert_eq!(state.current_term, 3);
    assert_eq!(state.voted_for, None);
}

#[test]
fn test_request_vote_log_comparison() {
    let mut state = RaftState::new();
    state.current_term = 3;
    state.log.append(LogEntry::new(1, "a"));
    state.log.append(LogEntry::new(1, "b"));
    state.log.append(LogEntry::new(2, "c"));

    // Higher last term wins even with a shorter log
    let newer_term = VoteRequest {
        term: 4,
        candidate_id: 2,
        last_log_index: 1,
        last_log_term: 3,
    };
    assert!(handle_request_vote(&mut state, &newer_term, 1).vote_granted);

    // Same last term but shorter log loses
    let mut state = RaftState::new();
    state.current_term = 3;
    state.log.append(LogEntry::new(2, "a"));
    state.log.append(LogEntry::new(2, "b"));
    let shorter = VoteRequest {
        term: 4,
        candidate_id: 2,
        last_log_index: 1,
        last_log_term: 2,
    };
    assert!(!handle_request_vote(&mut state, &shorter, 1).vote_granted);
}

#[test]
fn test_request_vote_higher_term_demotes_leader() {
    let mut state = RaftState::new();
    state.become_candidate(1);
    state.become_leader(1, &[2, 3]);
    assert_eq!(state.role, RaftRole::Leader);

    let req = VoteRequest {
        term: 5,
        candidate_id: 3,
        last_log_index: 0,
        last_log_term: 0,
    };

    let resp = handle_request_vote(&mut state, &req, 1);

    assert!(resp.vote_granted);
    assert_eq!(state.role, RaftRole::Follower);
    assert_eq!(state.current_term, 5);
    assert!(state.progress.is_empty());
}

#[test]
fn test_append_entries_heartbeat() {
    let mut state = RaftState::new();
    state.current_term = 1;

    let resp = handle_append_entries(&mut state, &heartbeat(1, 2, (0, 0), 0), 1);

    assert!(resp.success);
    assert_eq!(resp.term, 1);
    assert_eq!(state.leader_id, Some(2));
}

#[test]
fn test_append_entries_reject_stale_term() {
    let mut state = RaftState::new();
    state.current_term = 5;

    let resp = handle_append_entries(&mut state, &heartbeat(3, 2, (0, 0), 0), 1);

    assert!(!resp.success);
    assert_eq!(resp.term, 5);
    assert_eq!(resp.conflict_index, None);
    assert_eq!(state.leader_id, None);
}

#[test]
fn test_append_entries_update_commit_index() {
    let mut state = RaftState::new();
    state.current_term = 1;
    state.log.append(LogEntry::new(1, "a"));

    let resp = handle_append_entries(&mut state, &heartbeat(1, 2, (1, 1), 1), 1);

    assert!(resp.success);
    assert_eq!(state.commit_index, 1);
}

#[test]
fn test_append_entries_commit_bounded_by_request() {
    let mut state = RaftState::new();
    state.current_term = 1;
    state.log.append(LogEntry::new(1, "a"));
    state.log.append(LogEntry::new(1, "b"));
    state.log.append(LogEntry::new(1, "stale"));

    // The leader has committed 3, but this request only vouches up to 2
    let req = AppendEntriesRequest {
        term: 1,
        leader_id: 2,
        prev_log_index: 1,
        prev_log_term: 1,
        entries: vec![LogEntry::new(1, "b")],
        leader_commit: 3,
    };
    let resp = handle_append_entries(&mut state, &req, 1);

    assert!(resp.success);
    assert_eq!(state.commit_index, 2);
    // Matching entries are left alone
    assert_eq!(state.log.len(), 3);
}

#[test]
fn test_append_entries_missing_prev_log() {
    let mut state = RaftState::new();
    state.current_term = 1;
    state.log.append(LogEntry::new(1, "a"));

    let resp = handle_append_entries(&mut state, &heartbeat(1, 2, (5, 1), 0), 1);

    assert!(!resp.success);
    // Retry right after our last entry
    assert_eq!(resp.conflict_index, Some(2));
}

#[test]
fn test_append_entries_term_mismatch_leaves_log_alone() {
    let mut state = RaftState::new();
    state.current_term = 3;
    state.log.append(LogEntry::new(1, "a"));
    state.log.append(LogEntry::new(2, "b"));
    state.log.append(LogEntry::new(2, "c"));
    state.log.append(LogEntry::new(2, "d"));

    let req = AppendEntriesRequest {
        term: 3,
        leader_id: 2,
        prev_log_index: 4,
        prev_log_term: 3,
        entries: vec![LogEntry::new(3, "e")],
        leader_commit: 0,
    };
    let resp = handle_append_entries(&mut state, &req, 1);

    assert!(!resp.success);
    // First index of the conflicting term 2
    assert_eq!(resp.conflict_index, Some(2));
    assert_eq!(state.log.len(), 4);
    assert_eq!(state.log.term_at(4), Some(2));
}

#[test]
fn test_append_entries_truncates_conflicting_suffix() {
    let mut state = RaftState::new();
    state.current_term = 2;
    state.log.append(LogEntry::new(1, "a"));
    state.log.append(LogEntry::new(1, "old-b"));
    state.log.append(LogEntry::new(1, "old-c"));

    let req = AppendEntriesRequest {
        term: 2,
        leader_id: 2,
        prev_log_index: 1,
        prev_log_term: 1,
        entries: vec![LogEntry::new(2, "b")],
        leader_commit: 0,
    };
    let resp = handle_append_entries(&mut state, &req, 1);

    assert!(resp.success);
    assert_eq!(state.log.len(), 2);
    assert_eq!(state.log.get(2).unwrap().command, b"b".to_vec());
}

#[test]
fn test_append_entries_duplicate_is_idempotent() {
    let mut state = RaftState::new();
    state.current_term = 1;

    let req = AppendEntriesRequest {
        term: 1,
        leader_id: 2,
        prev_log_index: 0,
        prev_log_term: 0,
        entries: vec![LogEntry::new(1, "a"), LogEntry::new(1, "b")],
        leader_commit: 0,
    };
    assert!(handle_append_entries(&mut state, &req, 1).success);

    // A later request already extended the log
    state.log.append(LogEntry::new(1, "c"));

    // The first request arrives again
    assert!(handle_append_entries(&mut state, &req, 1).success);
    assert_eq!(state.log.len(), 3);
}

#[test]
fn test_append_entries_higher_term_becomes_follower() {
    let mut state = RaftState::new();
    state.current_term = 1;
    state.become_candidate(1); // Node is a candidate

    let resp = handle_append_entries(&mut state, &heartbeat(5, 2, (0, 0), 0), 1);

    assert!(resp.success);
    assert_eq!(state.current_term, 5);
    assert_eq!(state.role, RaftRole::Follower);
    assert_eq!(state.voted_for, None);
}

#[test]
fn test_append_entries_same_term_candidate_keeps_vote() {
    let mut state = RaftState::new();
    state.become_candidate(1);
    let term = state.current_term;

    let resp = handle_append_entries(&mut state, &heartbeat(term, 2, (0, 0), 0), 1);

    assert!(resp.success);
    assert_eq!(state.role, RaftRole::Follower);
    assert_eq!(state.voted_for, Some(1));
    assert_eq!(state.leader_id, Some(2));
}

#[test]
fn test_subscribe_commits_returns_receiver() {
    let raft_node = test_node(Arc::new(MemoryPersister::new()));

    // Should be able to subscribe multiple times
    let _commit_rx1 = raft_node.subscribe_commits();
    let _commit_rx2 = raft_node.subscribe_commits();
}

#[tokio::test]
async fn test_commit_notification_on_follower_append_entries() {
    let raft_node = test_node(Arc::new(MemoryPersister::new()));

    // Add an entry to the log so we can commit it
    {
        let mut state = raft_node.state.lock().await;
        state.current_term = 1;
        state.log.append(LogEntry::new(1, "a"));
    }

    let mut commit_rx = raft_node.subscribe_commits();

    let resp = raft_node
        .handle_append_entries(heartbeat(1, 2, (1, 1), 1))
        .await
        .unwrap();
    assert!(resp.success);

    // Should receive notification
    let result = tokio::time::timeout(Duration::from_millis(100), commit_rx.changed()).await;
    assert!(result.is_ok(), "Should receive commit notification");
    assert_eq!(*commit_rx.borrow(), 1);
}

#[tokio::test]
async fn test_no_notification_when_commit_index_unchanged() {
    let raft_node = test_node(Arc::new(MemoryPersister::new()));

    let mut commit_rx = raft_node.subscribe_commits();

    // Mark the current value as seen
    let _ = commit_rx.borrow_and_update();

    let resp = raft_node
        .handle_append_entries(heartbeat(1, 2, (0, 0), 0))
        .await
        .unwrap();
    assert!(resp.success);

    // Should timeout waiting for notification (none sent)
    let result = tokio::time::timeout(Duration::from_millis(50), commit_rx.changed()).await;
    assert!(
        result.is_err(),
        "Should not receive notification when commit_index unchanged"
    );
}

#[tokio::test]
async fn test_node_vote_is_persisted_before_reply() {
    let persister = Arc::new(MemoryPersister::new());
    let raft_node = test_node(persister.clone());

    let req = VoteRequest {
        term: 1,
        candidate_id: 2,
        last_log_index: 0,
        last_log_term: 0,
    };

    let resp = raft_node.handle_vote_request(req).await.unwrap();
    assert!(resp.vote_granted);

    let saved = persister.load().unwrap().expect("vote should be persisted");
    assert_eq!(saved.current_term, 1);
    assert_eq!(saved.voted_for, Some(2));
}

#[tokio::test]
async fn test_node_entries_are_persisted_before_reply() {
    let persister = Arc::new(MemoryPersister::new());
    let raft_node = test_node(persister.clone());

    let req = AppendEntriesRequest {
        term: 1,
        leader_id: 2,
        prev_log_index: 0,
        prev_log_term: 0,
        entries: vec![LogEntry::new(1, "a"), LogEntry::new(1, "b")],
        leader_commit: 0,
    };
    let resp = raft_node.handle_append_entries(req).await.unwrap();
    assert!(resp.success);

    let saved = persister.load().unwrap().expect("log should be persisted");
    assert_eq!(saved.log.len(), 2);
    assert_eq!(saved.log[1].command, b"b".to_vec());
}

#[tokio::test]
async fn test_node_fails_rpc_when_persist_fails() {
    let raft_node = test_node(Arc::new(BrokenDisk));

    let req = VoteRequest {
        term: 1,
        candidate_id: 2,
        last_log_index: 0,
        last_log_term: 0,
    };

    // No reply may leave the node if its vote was not made durable
    let result = raft_node.handle_vote_request(req).await;
    assert!(matches!(result, Err(RaftError::Storage(_))));
}

#[tokio::test]
async fn test_node_heartbeat_after_failed_append_writes_entries_first() {
    let disk = FlakyDisk::failing(1);
    let raft_node = test_node(disk.clone());

    let req = AppendEntriesRequest {
        term: 1,
        leader_id: 2,
        prev_log_index: 0,
        prev_log_term: 0,
        entries: vec![LogEntry::new(1, "x")],
        leader_commit: 0,
    };
    let result = raft_node.handle_append_entries(req).await;
    assert!(matches!(result, Err(RaftError::Storage(_))));
    assert!(disk.load().unwrap().is_none());

    // The heartbeat matches the entry kept in memory; its success reply
    // vouches for that entry, so it must be on disk by then.
    let resp = raft_node
        .handle_append_entries(heartbeat(1, 2, (1, 1), 1))
        .await
        .unwrap();
    assert!(resp.success);

    let saved = disk.load().unwrap().expect("entry should be persisted");
    assert_eq!(saved.current_term, 1);
    assert_eq!(saved.log.len(), 1);
    assert_eq!(saved.log[0].command, b"x".to_vec());
    assert!(!raft_node.state.lock().await.is_unsaved());
}

#[tokio::test]
async fn test_node_heartbeat_fails_while_disk_stays_broken() {
    let raft_node = test_node(Arc::new(BrokenDisk));

    let req = AppendEntriesRequest {
        term: 1,
        leader_id: 2,
        prev_log_index: 0,
        prev_log_term: 0,
        entries: vec![LogEntry::new(1, "x")],
        leader_commit: 0,
    };
    assert!(raft_node.handle_append_entries(req).await.is_err());

    let result = raft_node
        .handle_append_entries(heartbeat(1, 2, (1, 1), 1))
        .await;
    assert!(matches!(result, Err(RaftError::Storage(_))));
}

#[tokio::test]
async fn test_node_adopted_term_is_saved_after_failed_write() {
    let disk = FlakyDisk::failing(1);
    let raft_node = test_node(disk.clone());
    {
        let mut state = raft_node.state.lock().await;
        state.current_term = 2;
        state.log.append(LogEntry::new(2, "a"));
    }

    // Outdated log: no vote, but term 5 is adopted and the write fails.
    let req = VoteRequest {
        term: 5,
        candidate_id: 3,
        last_log_index: 0,
        last_log_term: 0,
    };
    assert!(raft_node.handle_vote_request(req).await.is_err());
    assert_eq!(raft_node.get_current_term().await, 5);

    // Same term again: nothing changes in memory, yet the reply waits for
    // term 5 to reach the disk.
    let resp = raft_node
        .handle_append_entries(heartbeat(5, 3, (0, 0), 0))
        .await
        .unwrap();
    assert!(resp.success);
    assert_eq!(resp.term, 5);

    let saved = disk.load().unwrap().expect("term should be persisted");
    assert_eq!(saved.current_term, 5);
    assert_eq!(saved.voted_for, None);
    assert_eq!(saved.log.len(), 1);
}

#[tokio::test]
async fn test_node_submit_on_follower_is_rejected() {
    let raft_node = test_node(Arc::new(MemoryPersister::new()));

    raft_node
        .handle_append_entries(heartbeat(3, 2, (0, 0), 0))
        .await
        .unwrap();

    match raft_node.submit(b"x".to_vec()).await {
        Err(RaftError::NotLeader { leader_id, term }) => {
            assert_eq!(leader_id, Some(2));
            assert_eq!(term, 3);
        }
        other => panic!("expected NotLeader, got {:?}", other),
    }
}

#[tokio::test]
async fn test_node_restores_persisted_state() {
    let persister = Arc::new(MemoryPersister::new());
    persister
        .save(&PersistentState {
            current_term: 7,
            voted_for: Some(3),
            log: vec![LogEntry::new(5, "a"), LogEntry::new(7, "b")],
        })
        .unwrap();

    let raft_node = test_node(persister);
    let status = raft_node.status().await;

    assert_eq!(status.term, 7);
    assert_eq!(status.role, RaftRole::Follower);
    assert_eq!(status.last_log_index, 2);
    // Commit progress is rebuilt from the leader
    assert_eq!(status.commit_index, 0);
    assert_eq!(status.last_applied, 0);
    assert_eq!(raft_node.state.lock().await.voted_for, Some(3));
}
