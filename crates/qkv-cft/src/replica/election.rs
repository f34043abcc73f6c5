//! Election timer and `RequestVote` handling.

use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use qkv_transport::PeerSender;

use crate::message::{PeerReply, PeerRequest, RequestVoteReply, RequestVoteRequest};
use crate::replica::state::Role;
use crate::replica::{CftEngine, RPC_DEADLINE};

const ELECTION_TIMEOUT_MIN_MS: u64 = 300;
const ELECTION_TIMEOUT_MAX_MS: u64 = 600;

/// Draws a fresh randomized election timeout in the [300, 600]ms range
///.
pub(crate) fn random_election_timeout() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(ELECTION_TIMEOUT_MIN_MS..=ELECTION_TIMEOUT_MAX_MS))
}

impl<S> CftEngine<S>
where
    S: PeerSender<PeerRequest, PeerReply>,
{
    pub(crate) fn reset_election_deadline(&self) {
        *self.election_deadline.lock().expect("election deadline mutex poisoned") =
            Instant::now() + random_election_timeout();
    }

    pub(crate) fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteReply {
        let mut state = self.state.lock().expect("replica state mutex poisoned");
        let reply = state.decide_vote(&req);
        self.persist_or_abort(&state);
        let granted = reply.vote_granted;
        drop(state);
        if granted {
            self.reset_election_deadline();
        }
        reply
    }

    /// Called periodically by the election loop. Starts a new election
    /// once the randomized timeout has elapsed without it being reset by a
    /// valid heartbeat or a vote grant.
    pub fn election_tick(&self) {
        let timed_out = {
            let deadline = *self.election_deadline.lock().expect("election deadline mutex poisoned");
            Instant::now() >= deadline
        };
        if timed_out {
            self.start_election();
        }
    }

    pub(crate) fn start_election(&self) {
        let (term, last_log_index, last_log_term) = {
            let mut state = self.state.lock().expect("replica state mutex poisoned");
            if state.role == Role::Leader {
                return;
            }
            let term = state.current_term().next();
            state.persistent.current_term = term;
            state.persistent.voted_for = Some(self.id);
            state.role = Role::Candidate;
            state.leader_hint = None;
            self.persist_or_abort(&state);
            (term, state.log_len(), state.last_log_term())
        };
        self.reset_election_deadline();
        tracing::info!(replica = %self.id, term = %term, "starting election");

        let request = RequestVoteRequest {
            term,
            candidate_id: self.id,
            last_log_index,
            last_log_term,
        };

        let mut votes = 1usize; // count our own vote
        let mut max_seen_term = term;

        thread::scope(|scope| {
            let handles: Vec<_> = self
                .peers
                .iter()
                .map(|peer| {
                    let request = request.clone();
                    scope.spawn(move || self.sender.send(peer, &PeerRequest::RequestVote(request), RPC_DEADLINE))
                })
                .collect();

            for handle in handles {
                if let Some(PeerReply::RequestVote(reply)) = handle.join().unwrap_or(None) {
                    max_seen_term = max_seen_term.max(reply.term);
                    if reply.vote_granted {
                        votes += 1;
                    }
                }
            }
        });

        let mut state = self.state.lock().expect("replica state mutex poisoned");
        if max_seen_term > term {
            state.step_down(max_seen_term);
            self.persist_or_abort(&state);
            return;
        }
        if state.role != Role::Candidate || state.current_term() != term {
            return; // a higher term or a concurrent AppendEntries already changed our mind
        }

        let cluster_size = self.peers.len() + 1;
        let majority = cluster_size / 2 + 1;
        if votes >= majority {
            self.become_leader_locked(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_election_timeout_is_within_bounds() {
        for _ in 0..100 {
            let timeout = random_election_timeout();
            assert!(timeout >= Duration::from_millis(ELECTION_TIMEOUT_MIN_MS));
            assert!(timeout <= Duration::from_millis(ELECTION_TIMEOUT_MAX_MS));
        }
    }
}
