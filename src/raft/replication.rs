use std::sync::Arc;

use tokio::time::timeout;

use crate::error::RaftError;
use crate::raft::node::RaftNode;
use crate::raft::rpc::{append_entries_request, AppendEntriesRequest, AppendEntriesResponse};
use crate::raft::state::RaftRole;

/// What a replicator does after reconciling one AppendEntries exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicationStep {
    /// Send again right away (log mismatch, or more entries pending).
    Continue,
    /// Peer is caught up or unreachable: wait for a heartbeat tick or new entries.
    Idle,
    /// No longer leader of the term this replicator was started for.
    Stop,
}

impl RaftNode {
    /// Spawn one replicator per peer for leadership of `term`.
    pub(crate) fn start_replication(self: &Arc<Self>, term: u64) {
        for &peer_id in &self.peer_ids {
            let node = self.clone();
            tokio::spawn(async move {
                node.replicate_to(peer_id, term).await;
            });
        }
    }

    /// Drive AppendEntries to `peer_id` until leadership of `term` ends.
    ///
    /// Only one request per peer is in flight at a time. An idle peer still
    /// gets an empty AppendEntries every heartbeat interval.
    async fn replicate_to(self: Arc<Self>, peer_id: u64, term: u64) {
        let mut log_tail = self.log_tail_tx.subscribe();
        tracing::debug!(node_id = self.id, peer_id, term, "Replicator started");

        loop {
            let req = {
                let state = self.state.lock().await;
                if state.role != RaftRole::Leader || state.current_term != term {
                    break;
                }
                match append_entries_request(
                    &state,
                    self.id,
                    peer_id,
                    self.config.max_entries_per_append,
                ) {
                    Some(req) => req,
                    None => break,
                }
            };

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = timeout(
                    self.config.rpc_timeout(),
                    self.transport.append_entries(peer_id, req.clone()),
                ) => result.unwrap_or(Err(RaftError::Timeout)),
            };

            let step = match result {
                Ok(resp) => self.handle_append_response(peer_id, &req, resp).await,
                Err(e) if e.is_transient() => {
                    tracing::trace!(node_id = self.id, peer_id, error = %e, "AppendEntries failed");
                    ReplicationStep::Idle
                }
                Err(e) => {
                    tracing::warn!(node_id = self.id, peer_id, error = %e, "AppendEntries failed");
                    ReplicationStep::Idle
                }
            };

            match step {
                ReplicationStep::Continue => continue,
                ReplicationStep::Stop => break,
                ReplicationStep::Idle => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.heartbeat_interval()) => {}
                        changed = log_tail.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        tracing::debug!(node_id = self.id, peer_id, term, "Replicator stopped");
    }

    /// Reconcile an AppendEntries reply with the state as it is now.
    async fn handle_append_response(
        &self,
        peer_id: u64,
        req: &AppendEntriesRequest,
        resp: AppendEntriesResponse,
    ) -> ReplicationStep {
        let mut state = self.state.lock().await;

        if state.convert_role(resp.term) {
            // On failure the state stays unsaved and is written before the next reply.
            let _ = self.persist(&mut state);
            tracing::info!(
                node_id = self.id,
                peer_id,
                term = resp.term,
                "Higher term in AppendEntries reply, stepping down"
            );
            return ReplicationStep::Stop;
        }
        if state.role != RaftRole::Leader || state.current_term != req.term {
            return ReplicationStep::Stop;
        }

        if resp.success {
            state.record_match(peer_id, req.last_index());
            if let Some(commit_index) = state.advance_commit_index(self.config.cluster_size()) {
                tracing::debug!(
                    node_id = self.id,
                    commit_index,
                    term = state.current_term,
                    "Updated commit index"
                );
                self.commit_tx.send_replace(commit_index);
            }

            let next_index = state
                .progress
                .get(&peer_id)
                .map(|p| p.next_index)
                .unwrap_or(u64::MAX);
            if next_index <= state.last_log_index() {
                ReplicationStep::Continue
            } else {
                ReplicationStep::Idle
            }
        } else {
            state.back_off_next_index(peer_id, resp.conflict_index);
            tracing::debug!(
                node_id = self.id,
                peer_id,
                next_index = ?state.progress.get(&peer_id).map(|p| p.next_index),
                "AppendEntries rejected, backing off"
            );
            ReplicationStep::Continue
        }
    }
}
