//! View change: timeout detection, vote collection, and the `NewView`
//! reconstruction that lets the new primary resume unfinished sequences.

use std::time::Instant;

use qkv_transport::PeerSender;

use qkv_types::{SeqNumber, ViewNumber};

use crate::message::{AcceptedReply, NewViewMessage, PeerReply, PeerRequest, PrePrepareMessage, ViewChangeMessage};
use crate::replica::state::{BftState, Phase};
use crate::replica::BftEngine;

impl<S> BftEngine<S>
where
    S: PeerSender<PeerRequest, PeerReply>,
{
    /// Called periodically by the view-change timer loop. Initiates a
    /// view change once the activity timeout has elapsed without being
    /// reset by valid protocol traffic from the current primary.
    pub fn view_change_tick(&self) {
        let timed_out = {
            let deadline = *self.view_change_deadline.lock().expect("view-change deadline mutex poisoned");
            Instant::now() >= deadline
        };
        if timed_out {
            self.start_view_change();
        }
    }

    pub(crate) fn start_view_change(&self) {
        let msg = {
            let mut state = self.state.lock().expect("replica state mutex poisoned");
            state.phase = Phase::ViewChange;
            let new_view = state.view.next();
            let last_seq = state.next_exec_seq.saturating_sub(1);
            let prepared = state.prepared_slots_above(last_seq);
            ViewChangeMessage { new_view, last_seq, replica_id: self.id, prepared }
        };
        tracing::info!(replica = %self.id, new_view = %msg.new_view, "starting view change");
        self.handle_view_change(msg.clone());
        self.broadcast(PeerRequest::ViewChange(msg));
    }

    pub(crate) fn handle_view_change(&self, msg: ViewChangeMessage) -> AcceptedReply {
        let (votes_for_new_view, current_view) = {
            let mut state = self.state.lock().expect("replica state mutex poisoned");
            if msg.new_view <= state.view {
                return AcceptedReply::no();
            }
            state.view_change_votes.entry(msg.new_view).or_default().insert(msg.replica_id, msg.clone());
            let votes = state.view_change_votes.get(&msg.new_view).cloned().unwrap_or_default();
            (votes, state.view)
        };

        if votes_for_new_view.len() < BftState::quorum_size(self.n) || current_view >= msg.new_view {
            return AcceptedReply::yes();
        }

        let am_new_primary = BftState::primary_for(msg.new_view, self.n) == self.id;
        if am_new_primary {
            let proof: Vec<ViewChangeMessage> = votes_for_new_view.into_values().collect();
            let reassigned = self.build_reassigned_preprepares(msg.new_view, &proof);

            {
                let mut state = self.state.lock().expect("replica state mutex poisoned");
                state.view = msg.new_view;
                state.phase = Phase::Normal;
                state.view_active = false;
            }
            self.adopt_reassigned(msg.new_view, &reassigned);
            {
                let mut state = self.state.lock().expect("replica state mutex poisoned");
                state.view_active = true;
            }
            self.reset_view_change_deadline();
            tracing::info!(replica = %self.id, new_view = %msg.new_view, reassigned = reassigned.len(), "became primary via view change");
            self.broadcast(PeerRequest::NewView(NewViewMessage {
                new_view: msg.new_view,
                view_change_proof: proof,
                reassigned,
            }));
        } else {
            let mut state = self.state.lock().expect("replica state mutex poisoned");
            if state.view < msg.new_view {
                state.view = msg.new_view;
                state.phase = Phase::Normal;
                state.view_active = true;
                drop(state);
                self.reset_view_change_deadline();
            }
        }
        AcceptedReply::yes()
    }

    /// Accepts a `NewView` on the strength of its vote count alone — this
    /// revision has no signatures, so a replica cannot separately
    /// authenticate that the sender is the arithmetic primary for
    /// `new_view`; it trusts any quorum-sized proof.
    pub(crate) fn handle_new_view(&self, msg: NewViewMessage) -> AcceptedReply {
        if msg.view_change_proof.len() < BftState::quorum_size(self.n) {
            return AcceptedReply::no();
        }

        {
            let mut state = self.state.lock().expect("replica state mutex poisoned");
            if msg.new_view < state.view {
                return AcceptedReply::no();
            }
            if state.view < msg.new_view {
                state.view = msg.new_view;
            }
            state.phase = Phase::Normal;
            state.view_active = true;
        }

        self.adopt_reassigned(msg.new_view, &msg.reassigned);
        self.reset_view_change_deadline();
        AcceptedReply::yes()
    }

    /// Stores each reassigned PrePrepare as locally accepted and records
    /// this replica's own Prepare vote for it, then broadcasts Prepare —
    /// the same path a freshly-received PrePrepare takes.
    fn adopt_reassigned(&self, view: ViewNumber, reassigned: &[PrePrepareMessage]) {
        for msg in reassigned {
            {
                let mut state = self.state.lock().expect("replica state mutex poisoned");
                state.pending.insert(msg.digest, msg.request.clone());
                state.record_own_prepare(view, msg.seq, msg.digest, &msg.request);
            }
            self.broadcast(PeerRequest::Prepare(crate::message::PrepareMessage {
                view,
                seq: msg.seq,
                digest: msg.digest,
                replica_id: self.id,
            }));
        }
    }

    /// Reconstructs the PrePrepares the new primary must reissue for every
    /// sequence left unfinished by the old primary: the gap between the
    /// lowest `last_seq` any voter reports as executed and the highest seq
    /// any voter attests to having prepared. A slot with no attestation is
    /// filled with a no-op.
    fn build_reassigned_preprepares(&self, new_view: ViewNumber, proof: &[ViewChangeMessage]) -> Vec<PrePrepareMessage> {
        let low = proof.iter().map(|v| v.last_seq.as_u64()).min().unwrap_or(0);
        let high = proof
            .iter()
            .flat_map(|v| v.prepared.iter().map(|p| p.seq.as_u64()))
            .max()
            .unwrap_or(low);

        let mut reassigned = Vec::new();
        for raw_seq in (low + 1)..=high {
            let seq = SeqNumber::new(raw_seq);
            let attested = proof.iter().flat_map(|v| v.prepared.iter()).find(|p| p.seq == seq);

            let (digest, request) = match attested {
                Some(slot) => (slot.digest, slot.request.clone()),
                None => {
                    let noop = crate::message::ClientRequest {
                        operation: qkv_types::Command::from_str("GET __noop__"),
                        timestamp: 0,
                        client_id: 0,
                    };
                    (self.digest_of(&noop.operation.0), noop)
                }
            };

            reassigned.push(PrePrepareMessage { view: new_view, seq, digest, request, primary_id: self.id });
        }
        reassigned
    }
}
