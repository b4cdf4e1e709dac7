use std::sync::Arc;

use tokio::time::timeout;

use crate::error::RaftError;
use crate::raft::node::RaftNode;
use crate::raft::rpc::{vote_request, VoteRequest};
use crate::raft::state::{quorum, RaftRole, RaftState};

impl RaftNode {
    /// Start a new election
    ///
    /// Moves to the next term as candidate, votes for itself and asks every
    /// peer for a vote concurrently. Replies are tallied as they arrive in
    /// `solicit_vote`.
    pub(crate) async fn start_election(self: &Arc<Self>) {
        let req = {
            let mut state = self.state.lock().await;
            if state.role == RaftRole::Leader {
                return;
            }

            state.become_candidate(self.id);
            state.reset_election_timer(self.new_election_timeout());
            if self.persist(&mut state).is_err() {
                // Without a durable self-vote this candidacy is not safe;
                // the next timeout tries again.
                return;
            }

            tracing::info!(
                node_id = self.id,
                term = state.current_term,
                "Starting election"
            );

            let votes = state.votes.len();
            if votes >= quorum(self.config.cluster_size()) {
                self.become_leader(&mut state, votes);
                return;
            }
            vote_request(&state, self.id)
        };

        for &peer_id in &self.peer_ids {
            let node = self.clone();
            let req = req.clone();
            tokio::spawn(async move {
                node.solicit_vote(peer_id, req).await;
            });
        }
    }

    async fn solicit_vote(self: Arc<Self>, peer_id: u64, req: VoteRequest) {
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            result = timeout(
                self.config.rpc_timeout(),
                self.transport.request_vote(peer_id, req.clone()),
            ) => result.unwrap_or(Err(RaftError::Timeout)),
        };

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::trace!(node_id = self.id, peer_id, error = %e, "Vote request failed");
                return;
            }
        };

        let mut state = self.state.lock().await;

        if state.convert_role(resp.term) {
            // On failure the state stays unsaved and is written before the next reply.
            let _ = self.persist(&mut state);
            tracing::info!(
                node_id = self.id,
                peer_id,
                term = resp.term,
                "Higher term in vote reply, stepping down"
            );
            return;
        }

        // The election this reply belongs to may be long over.
        if state.role != RaftRole::Candidate || state.current_term != req.term {
            return;
        }
        if !resp.vote_granted {
            return;
        }

        let votes = state.record_vote(peer_id);
        tracing::debug!(
            node_id = self.id,
            peer_id,
            term = req.term,
            votes,
            "Received vote"
        );

        if votes >= quorum(self.config.cluster_size()) {
            self.become_leader(&mut state, votes);
        }
    }

    fn become_leader(self: &Arc<Self>, state: &mut RaftState, votes: usize) {
        if !state.become_leader(self.id, &self.peer_ids) {
            return;
        }
        tracing::info!(
            node_id = self.id,
            term = state.current_term,
            votes,
            "Became leader"
        );
        self.start_replication(state.current_term);
    }
}
