use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::{RaftError, Result};
use crate::raft::apply::ApplyMsg;
use crate::raft::persist::Persister;
use crate::raft::rpc::{
    handle_append_entries, handle_request_vote, AppendEntriesRequest, AppendEntriesResponse,
    VoteRequest, VoteResponse,
};
use crate::raft::state::{RaftRole, RaftState};
use crate::raft::timer::random_election_timeout;
use crate::raft::transport::Transport;

/// Point-in-time view of a node, read under the state lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub node_id: u64,
    pub role: RaftRole,
    pub term: u64,
    pub leader_id: Option<u64>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub last_log_index: u64,
}

/// The main Raft node that coordinates consensus
///
/// All mutable consensus state sits behind one mutex. Background tasks
/// (election timer, vote solicitation, per-peer replicators, apply loop)
/// take it, copy what they need, release it before any RPC and take it
/// again to reconcile the reply against the term and role current at that
/// moment.
pub struct RaftNode {
    pub id: u64,
    pub state: Mutex<RaftState>,
    pub(crate) config: NodeConfig,
    pub(crate) peer_ids: Vec<u64>,
    pub(crate) transport: Arc<dyn Transport>,
    persister: Arc<dyn Persister>,
    pub(crate) apply_tx: mpsc::Sender<ApplyMsg>,
    /// Latest commit index, wakes the apply loop.
    pub(crate) commit_tx: watch::Sender<u64>,
    /// Latest log index, wakes idle replicators.
    pub(crate) log_tail_tx: watch::Sender<u64>,
    pub(crate) shutdown: CancellationToken,
}

impl RaftNode {
    /// Build a node, restoring term, vote and log from `persister`.
    ///
    /// Returns the receiving end of the apply channel: every committed
    /// command is delivered there once, in log order.
    pub fn new(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        persister: Arc<dyn Persister>,
    ) -> Result<(Self, mpsc::Receiver<ApplyMsg>)> {
        config.validate()?;

        let mut state = match persister.load()? {
            Some(persisted) => {
                tracing::info!(
                    node_id = config.node_id,
                    term = persisted.current_term,
                    log_len = persisted.log.len(),
                    "Restored persisted Raft state"
                );
                RaftState::restore(persisted)
            }
            None => RaftState::new(),
        };
        state.reset_election_timer(random_election_timeout(
            config.election_timeout_base_ms,
            config.election_timeout_jitter_ms,
        ));

        let (apply_tx, apply_rx) = mpsc::channel(config.apply_buffer);
        let (commit_tx, _) = watch::channel(state.commit_index);
        let (log_tail_tx, _) = watch::channel(state.last_log_index());

        let node = Self {
            id: config.node_id,
            peer_ids: config.peer_ids(),
            state: Mutex::new(state),
            config,
            transport,
            persister,
            apply_tx,
            commit_tx,
            log_tail_tx,
            shutdown: CancellationToken::new(),
        };

        Ok((node, apply_rx))
    }

    /// Run the election timer and the apply loop until `shutdown()` is called.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            node_id = self.id,
            peers = ?self.peer_ids,
            "Raft node started"
        );

        let apply_loop = tokio::spawn(self.clone().run_apply_loop());
        self.run_election_timer().await;
        let _ = apply_loop.await;

        tracing::info!(node_id = self.id, "Raft node stopped");
    }

    /// Stop every background task of this node.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// A stopped node answers nothing, like a crashed one.
    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(RaftError::Shutdown);
        }
        Ok(())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    async fn run_election_timer(self: &Arc<Self>) {
        loop {
            let wake_at = {
                let mut state = self.state.lock().await;
                if state.role == RaftRole::Leader {
                    // Replicators carry the heartbeats. Keep our own timer
                    // armed so a step-down starts from a full timeout.
                    state.reset_election_timer(self.new_election_timeout());
                    Instant::now() + self.config.heartbeat_interval()
                } else {
                    state.election_deadline()
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(wake_at) => {}
            }

            let expired = {
                let state = self.state.lock().await;
                state.role != RaftRole::Leader && Instant::now() >= state.election_deadline()
            };
            if expired {
                self.start_election().await;
            }
        }
    }

    pub(crate) fn new_election_timeout(&self) -> Duration {
        random_election_timeout(
            self.config.election_timeout_base_ms,
            self.config.election_timeout_jitter_ms,
        )
    }

    /// Write term, vote and log through the persister.
    ///
    /// A failed save leaves the state marked unsaved, and no RPC reply goes
    /// out until a later save succeeds.
    pub(crate) fn persist(&self, state: &mut RaftState) -> Result<()> {
        match self.persister.save(&state.persistent_state()) {
            Ok(()) => {
                state.mark_saved();
                Ok(())
            }
            Err(e) => {
                state.mark_unsaved();
                tracing::error!(node_id = self.id, error = %e, "Failed to persist Raft state");
                Err(e)
            }
        }
    }

    /// Append a command to the log if this node is the leader.
    ///
    /// Returns `(index, term)` of the new entry right away; commitment is
    /// observed later on the apply channel. Fails with `NotLeader` otherwise.
    pub async fn submit(&self, command: Vec<u8>) -> Result<(u64, u64)> {
        self.ensure_running()?;
        let mut state = self.state.lock().await;

        if state.role != RaftRole::Leader {
            return Err(RaftError::NotLeader {
                leader_id: state.leader_id,
                term: state.current_term,
            });
        }

        let index = state.append_command(command);
        let term = state.current_term;
        if let Err(e) = self.persist(&mut state) {
            state.log.truncate(index);
            return Err(e);
        }
        tracing::debug!(node_id = self.id, index, term, "Appended command to log");

        if let Some(commit_index) = state.advance_commit_index(self.config.cluster_size()) {
            self.commit_tx.send_replace(commit_index);
        }
        self.log_tail_tx.send_replace(index);

        Ok((index, term))
    }

    /// Tuple form of `submit`: `(index, term, is_leader)`.
    /// Index is 0 when this node is not the leader.
    pub async fn start(&self, command: Vec<u8>) -> (u64, u64, bool) {
        match self.submit(command).await {
            Ok((index, term)) => (index, term, true),
            Err(RaftError::NotLeader { term, .. }) => (0, term, false),
            Err(_) => (0, self.get_current_term().await, false),
        }
    }

    /// Handle incoming RequestVote RPC
    pub async fn handle_vote_request(&self, req: VoteRequest) -> Result<VoteResponse> {
        self.ensure_running()?;
        let mut state = self.state.lock().await;
        let before = (state.current_term, state.voted_for);

        let response = handle_request_vote(&mut state, &req, self.id);

        if (state.current_term, state.voted_for) != before || state.is_unsaved() {
            self.persist(&mut state)?;
        }
        if response.vote_granted {
            state.reset_election_timer(self.new_election_timeout());
        }

        Ok(response)
    }

    /// Handle incoming AppendEntries RPC
    pub async fn handle_append_entries(
        &self,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        self.ensure_running()?;
        let mut state = self.state.lock().await;
        let before = (state.current_term, state.voted_for);
        let commit_before = state.commit_index;

        let response = handle_append_entries(&mut state, &req, self.id);

        if !req.entries.is_empty()
            || (state.current_term, state.voted_for) != before
            || state.is_unsaved()
        {
            self.persist(&mut state)?;
        }
        // Anything not rejected as stale came from the leader of our term.
        if response.term == req.term {
            state.reset_election_timer(self.new_election_timeout());
        }
        if state.commit_index > commit_before {
            self.commit_tx.send_replace(state.commit_index);
        }

        Ok(response)
    }

    pub async fn status(&self) -> NodeStatus {
        let state = self.state.lock().await;
        NodeStatus {
            node_id: self.id,
            role: state.role,
            term: state.current_term,
            leader_id: state.leader_id,
            commit_index: state.commit_index,
            last_applied: state.last_applied,
            last_log_index: state.last_log_index(),
        }
    }

    /// Current role.
    pub async fn get_status(&self) -> RaftRole {
        self.state.lock().await.role
    }

    pub async fn get_current_term(&self) -> u64 {
        self.state.lock().await.current_term
    }

    /// Check if this node is the leader
    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.role == RaftRole::Leader
    }

    /// Get the current leader ID
    pub async fn leader_id(&self) -> Option<u64> {
        self.state.lock().await.leader_id
    }

    /// Watch the commit index.
    pub fn subscribe_commits(&self) -> watch::Receiver<u64> {
        self.commit_tx.subscribe()
    }
}
