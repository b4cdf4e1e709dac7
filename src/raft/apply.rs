use std::sync::Arc;

use crate::raft::node::RaftNode;

/// A committed command handed to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyMsg {
    pub command_valid: bool,
    pub command: Vec<u8>,
    pub command_index: u64,
}

impl RaftNode {
    /// Deliver committed entries to the apply channel, in index order.
    ///
    /// `last_applied` moves only after the channel accepted the entry. A full
    /// channel blocks this loop, never the state lock.
    pub(crate) async fn run_apply_loop(self: Arc<Self>) {
        let mut commits = self.commit_tx.subscribe();

        loop {
            while let Some(msg) = self.next_apply_msg().await {
                let index = msg.command_index;
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    sent = self.apply_tx.send(msg) => {
                        if sent.is_err() {
                            tracing::info!(node_id = self.id, "Apply channel closed, stopping apply loop");
                            return;
                        }
                    }
                }
                self.state.lock().await.mark_applied(index);
                tracing::trace!(node_id = self.id, index, "Applied entry");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                changed = commits.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn next_apply_msg(&self) -> Option<ApplyMsg> {
        let state = self.state.lock().await;
        state.next_to_apply().map(|(index, entry)| ApplyMsg {
            command_valid: true,
            command: entry.command.clone(),
            command_index: index,
        })
    }
}
