//! The three-phase voting path: PrePrepare, Prepare, Commit, and client
//! request submission.

use std::thread;

use qkv_transport::PeerSender;

use qkv_types::ViewNumber;

use crate::message::{
    AcceptedReply, ClientRequest, CommitMessage, PeerReply, PeerRequest, PrePrepareMessage, PrepareMessage,
    RequestReply,
};
use crate::replica::state::BftState;
use crate::replica::{BftEngine, RPC_DEADLINE};

impl<S> BftEngine<S>
where
    S: PeerSender<PeerRequest, PeerReply>,
{
    /// Broadcasts `request` to every peer, on its own thread, ignoring
    /// replies — the three-phase vote count, not the RPC reply, is what
    /// drives progress.
    pub(crate) fn broadcast(&self, request: PeerRequest) {
        thread::scope(|scope| {
            for peer in &self.peers {
                let request = request.clone();
                scope.spawn(move || {
                    self.sender.send(peer, &request, RPC_DEADLINE);
                });
            }
        });
    }

    /// A client `Request` to the presumed primary. Blocks until
    /// the operation executes, the view moves on without it, or the client
    /// deadline elapses.
    pub fn submit(&self, request: ClientRequest) -> RequestReply {
        let (view, seq, digest) = {
            let mut state = self.state.lock().expect("replica state mutex poisoned");
            if !state.is_primary(self.n) {
                let primary = BftState::primary_for(state.view, self.n);
                return RequestReply {
                    view: state.view,
                    timestamp: request.timestamp,
                    replica_id: self.id,
                    success: false,
                    result: format!("not primary, expected primary is replica {primary}"),
                };
            }
            if !state.view_active {
                return RequestReply {
                    view: state.view,
                    timestamp: request.timestamp,
                    replica_id: self.id,
                    success: false,
                    result: "view change in progress, not yet accepting requests".to_string(),
                };
            }

            let view = state.view;
            let seq = state.highest_seq_assigned.next();
            let digest = self.digest_of(&request.operation.0);
            state.pending.insert(digest, request.clone());
            state.record_own_prepare(view, seq, digest, &request);
            (view, seq, digest)
        };

        self.broadcast(PeerRequest::PrePrepare(PrePrepareMessage {
            view,
            seq,
            digest,
            request: request.clone(),
            primary_id: self.id,
        }));
        self.broadcast(PeerRequest::Prepare(PrepareMessage { view, seq, digest, replica_id: self.id }));

        self.await_execution(view, seq, request.timestamp)
    }

    /// Waits for `(view, seq)` to execute, up to the client deadline.
    pub(crate) fn await_execution(&self, view: ViewNumber, seq: qkv_types::SeqNumber, timestamp: u64) -> RequestReply {
        let guard = self.applied.lock().expect("applied map mutex poisoned");
        let (mut guard, result) = self
            .applied_cv
            .wait_timeout_while(guard, super::CLIENT_DEADLINE, |map| !map.contains_key(&(view, seq)))
            .expect("applied map mutex poisoned");

        if result.timed_out() {
            return RequestReply {
                view,
                timestamp,
                replica_id: self.id,
                success: false,
                result: "timed out waiting for execution".to_string(),
            };
        }

        let reply = guard.remove(&(view, seq)).expect("condvar predicate guarantees entry present");
        RequestReply { view, timestamp, replica_id: self.id, success: reply.ok, result: reply.message }
    }

    pub(crate) fn handle_pre_prepare(&self, msg: PrePrepareMessage) -> AcceptedReply {
        let expected_digest = self.digest_of(&msg.request.operation.0);
        {
            let mut state = self.state.lock().expect("replica state mutex poisoned");
            if msg.view != state.view {
                return AcceptedReply::no();
            }
            let expected_primary = BftState::primary_for(state.view, self.n);
            if msg.primary_id != expected_primary {
                return AcceptedReply::no();
            }
            if msg.digest != expected_digest {
                tracing::warn!(replica = %self.id, primary = %msg.primary_id, "rejecting PrePrepare with mismatched digest");
                return AcceptedReply::no();
            }

            state.pending.insert(msg.digest, msg.request.clone());
            state.record_own_prepare(msg.view, msg.seq, msg.digest, &msg.request);
        }

        self.reset_view_change_deadline();
        self.broadcast(PeerRequest::Prepare(PrepareMessage {
            view: msg.view,
            seq: msg.seq,
            digest: msg.digest,
            replica_id: self.id,
        }));
        AcceptedReply::yes()
    }

    pub(crate) fn handle_prepare(&self, msg: PrepareMessage) -> AcceptedReply {
        let reached = {
            let mut state = self.state.lock().expect("replica state mutex poisoned");
            if msg.view != state.view {
                return AcceptedReply::no();
            }
            let reached = state.record_prepare_vote(msg.view, msg.seq, msg.digest, msg.replica_id, self.n);
            if reached {
                state.record_own_commit(msg.view, msg.seq);
            }
            reached
        };

        if reached {
            self.broadcast(PeerRequest::Commit(CommitMessage {
                view: msg.view,
                seq: msg.seq,
                digest: msg.digest,
                replica_id: self.id,
            }));
        }
        AcceptedReply::yes()
    }

    pub(crate) fn handle_commit(&self, msg: CommitMessage) -> AcceptedReply {
        let to_execute = {
            let mut state = self.state.lock().expect("replica state mutex poisoned");
            if msg.view != state.view {
                return AcceptedReply::no();
            }
            let reached = state.record_commit_vote(msg.view, msg.seq, msg.digest, msg.replica_id, self.n);
            if !reached {
                return AcceptedReply::yes();
            }

            let mut ready = Vec::new();
            loop {
                let seq = state.next_exec_seq;
                let view = state.view;
                let Some(slot) = state.slot(view, seq) else { break };
                if slot.commit_votes.len() < BftState::quorum_size(self.n) {
                    break;
                }
                let command = slot.request.operation.clone();
                state.mark_executed(view, seq);
                ready.push((view, seq, command));
            }
            ready
        };

        if !to_execute.is_empty() {
            self.reset_view_change_deadline();
        }
        for (view, seq, command) in to_execute {
            let reply = self.kernel.apply(&command);
            self.applied.lock().expect("applied map mutex poisoned").insert((view, seq), reply);
        }
        self.applied_cv.notify_all();
        AcceptedReply::yes()
    }
}
