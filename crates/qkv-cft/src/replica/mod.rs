//! The CFT replica: election timer, log replication, and apply loop, plus
//! the engine type that ties them to a concrete [`qkv_transport::PeerSender`].

mod apply;
mod election;
mod replication;
pub mod state;

pub use state::Role;

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use qkv_kernel::{Reply, StateMachine};
use qkv_types::{Command, LogIndex, PeerDescriptor, ReplicaId, Term};
use qkv_wal::Wal;

use crate::message::{PeerReply, PeerRequest, PingReply};
use state::ReplicaState;

pub(crate) const RPC_DEADLINE: Duration = Duration::from_millis(100);
pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);
pub(crate) const SUBMIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of [`CftEngine::submit`].
#[derive(Debug)]
pub enum SubmitOutcome {
    Applied(Reply),
    NotLeader { leader_hint: Option<ReplicaId> },
    TimedOut,
}

/// A point-in-time view of engine status, for `GetState`.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub node_id: ReplicaId,
    pub role: Role,
    pub term: Term,
    pub log_length: LogIndex,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub leader_hint: Option<ReplicaId>,
}

/// One CFT replica: volatile and persistent consensus state, a reference to
/// the local kernel, and the means to talk to its peers.
pub struct CftEngine<S> {
    pub(crate) id: ReplicaId,
    pub(crate) peers: Vec<PeerDescriptor>,
    pub(crate) sender: S,
    pub(crate) wal: Wal,
    pub(crate) kernel: StateMachine,
    pub(crate) state: Mutex<ReplicaState>,
    pub(crate) election_deadline: Mutex<Instant>,
    pub(crate) applied: Mutex<HashMap<LogIndex, Reply>>,
    pub(crate) applied_cv: Condvar,
}

impl<S> CftEngine<S> {
    /// Boots a replica, recovering persistent state from `wal`. `peers` must not include `id`.
    pub fn new(id: ReplicaId, peers: Vec<PeerDescriptor>, wal: Wal, sender: S) -> Self {
        let persistent = wal.load();
        let state = ReplicaState::recover(id, persistent);
        Self {
            id,
            peers,
            sender,
            wal,
            kernel: StateMachine::new(),
            state: Mutex::new(state),
            election_deadline: Mutex::new(Instant::now() + election::random_election_timeout()),
            applied: Mutex::new(HashMap::new()),
            applied_cv: Condvar::new(),
        }
    }

    pub(crate) fn persist_or_abort(&self, state: &ReplicaState) {
        if let Err(err) = self.wal.save(&state.persistent) {
            tracing::error!(replica = %self.id, error = %err, "WAL save failed, exiting process");
            std::process::exit(1);
        }
    }

    /// This replica's own id.
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// A snapshot of this replica's role, term, and commit progress.
    pub fn status(&self) -> EngineStatus {
        let state = self.state.lock().expect("replica state mutex poisoned");
        EngineStatus {
            node_id: self.id,
            role: state.role,
            term: state.current_term(),
            log_length: state.log_len(),
            commit_index: state.commit_index,
            last_applied: state.last_applied,
            leader_hint: state.leader_hint,
        }
    }

    /// Reads a key directly from the kernel, bypassing the log (`GetData`).
    pub fn get(&self, key: &str) -> Option<String> {
        self.kernel.get(key)
    }

    pub fn data_len(&self) -> usize {
        self.kernel.len()
    }
}

impl<S> CftEngine<S>
where
    S: qkv_transport::PeerSender<PeerRequest, PeerReply>,
{
    /// Dispatches one incoming peer RPC to the appropriate handler.
    pub fn handle_peer_request(&self, req: PeerRequest) -> PeerReply {
        match req {
            PeerRequest::RequestVote(r) => PeerReply::RequestVote(self.handle_request_vote(r)),
            PeerRequest::AppendEntries(r) => PeerReply::AppendEntries(self.handle_append_entries(r)),
            PeerRequest::Ping(_) => PeerReply::Ping(PingReply {
                receiver_id: self.id,
                message: format!("pong from replica {}", self.id),
            }),
        }
    }

    /// Appends `command` to the log if this replica is Leader, and blocks
    /// until it is applied, rejected, or times out.
    pub fn submit(&self, command: Command) -> SubmitOutcome {
        let index = {
            let mut state = self.state.lock().expect("replica state mutex poisoned");
            if state.role != Role::Leader {
                return SubmitOutcome::NotLeader { leader_hint: state.leader_hint };
            }
            let index = state.append_local(command);
            self.persist_or_abort(&state);
            index
        };

        self.heartbeat_tick();

        let guard = self.applied.lock().expect("applied map mutex poisoned");
        let (mut guard, result) = self
            .applied_cv
            .wait_timeout_while(guard, SUBMIT_TIMEOUT, |map| !map.contains_key(&index))
            .expect("applied map mutex poisoned");

        if result.timed_out() {
            return SubmitOutcome::TimedOut;
        }
        SubmitOutcome::Applied(guard.remove(&index).expect("condvar predicate guarantees entry present"))
    }
}
