//! Leader heartbeat fan-out and `AppendEntries` handling, on both the
//! leader and follower side.

use std::thread;

use qkv_transport::PeerSender;

use crate::message::{AppendEntriesReply, AppendEntriesRequest, PeerReply, PeerRequest};
use crate::replica::state::{ReplicaState, Role};
use crate::replica::{CftEngine, RPC_DEADLINE};

use qkv_types::{LogIndex, ReplicaId, Term};

impl<S> CftEngine<S>
where
    S: PeerSender<PeerRequest, PeerReply>,
{
    pub(crate) fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesReply {
        let mut state = self.state.lock().expect("replica state mutex poisoned");
        let reply = state.handle_append_entries(&req);
        self.persist_or_abort(&state);
        drop(state);
        self.reset_election_deadline();
        reply
    }

    pub(crate) fn become_leader_locked(&self, state: &mut ReplicaState) {
        state.role = Role::Leader;
        state.leader_hint = Some(self.id);
        let next = state.log_len().next();
        state.next_index = self.peers.iter().map(|p| (p.id, next)).collect();
        state.match_index = self.peers.iter().map(|p| (p.id, LogIndex::ZERO)).collect();
        tracing::info!(replica = %self.id, term = %state.current_term(), "became leader");
    }

    /// Leader-only: called periodically by the heartbeat loop. Sends an
    /// `AppendEntries` to every peer — empty for a pure heartbeat, or
    /// carrying the entries that peer is missing — and advances
    /// `commit_index` from the replies.
    pub fn heartbeat_tick(&self) {
        let (term, plan) = {
            let state = self.state.lock().expect("replica state mutex poisoned");
            if state.role != Role::Leader {
                return;
            }
            let term = state.current_term();
            let log_len = state.log_len().as_u64() as usize;
            let plan: Vec<_> = self
                .peers
                .iter()
                .map(|peer| {
                    let next_index = state.next_index.get(&peer.id).copied().unwrap_or(LogIndex::new(1));
                    let prev_log_index = LogIndex::new(next_index.as_u64().saturating_sub(1));
                    let prev_log_term = state.entry_at(prev_log_index).map(|e| e.term).unwrap_or(Term::ZERO);
                    let start = (prev_log_index.as_u64() as usize).min(log_len);
                    let entries = state.persistent.log[start..].to_vec();
                    // What we're sending, not what the follower reports back, is the
                    // only index the leader may trust for this peer's match/next —
                    // the follower's own log can run ahead with entries from a
                    // prior leader it hasn't yet been told to discard.
                    let sent_match = LogIndex::new(start as u64 + entries.len() as u64);
                    (
                        peer.clone(),
                        sent_match,
                        AppendEntriesRequest {
                            term,
                            leader_id: self.id,
                            prev_log_index,
                            prev_log_term,
                            entries,
                            leader_commit: state.commit_index,
                        },
                    )
                })
                .collect();
            (term, plan)
        };

        let mut replies: Vec<(ReplicaId, LogIndex, Option<PeerReply>)> = Vec::with_capacity(plan.len());
        thread::scope(|scope| {
            let handles: Vec<_> = plan
                .iter()
                .map(|(peer, sent_match, req)| {
                    let peer_id = peer.id;
                    let sent_match = *sent_match;
                    scope.spawn(move || {
                        (peer_id, sent_match, self.sender.send(peer, &PeerRequest::AppendEntries(req.clone()), RPC_DEADLINE))
                    })
                })
                .collect();
            for handle in handles {
                replies.push(handle.join().unwrap_or((ReplicaId::new(0), LogIndex::ZERO, None)));
            }
        });

        let mut state = self.state.lock().expect("replica state mutex poisoned");
        if state.role != Role::Leader || state.current_term() != term {
            return;
        }

        for (peer_id, sent_match, reply) in replies {
            let Some(PeerReply::AppendEntries(reply)) = reply else { continue };
            if reply.term > term {
                state.step_down(reply.term);
                self.persist_or_abort(&state);
                return;
            }
            if reply.success {
                state.match_index.insert(peer_id, sent_match);
                state.next_index.insert(peer_id, sent_match.next());
            } else {
                let current = state.next_index.get(&peer_id).copied().unwrap_or(LogIndex::new(1));
                let retreated = current.as_u64().saturating_sub(1).max(1);
                state.next_index.insert(peer_id, LogIndex::new(retreated));
            }
        }

        let cluster_size = self.peers.len() + 1;
        if let Some(new_commit) = state.majority_commit_index(cluster_size) {
            state.commit_index = new_commit;
        }
    }
}
