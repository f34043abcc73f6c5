//! The BFT replica: three-phase voting, view change, and the engine type
//! that ties them to a concrete [`qkv_transport::PeerSender`].

mod normal;
pub mod state;
mod view_change;

pub use state::Phase;

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use qkv_kernel::{Reply, StateMachine};
use qkv_types::{Digest, PeerDescriptor, ReplicaId, SeqNumber, ViewNumber};

use crate::message::{PeerReply, PeerRequest, RequestMessage, RequestReply, StatusReply};
use state::BftState;

pub(crate) const RPC_DEADLINE: Duration = Duration::from_millis(500);
pub(crate) const CLIENT_DEADLINE: Duration = Duration::from_secs(8);
pub(crate) const VIEW_CHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// A point-in-time view of engine status, for `GetStatus`.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub view: ViewNumber,
    pub last_sequence: SeqNumber,
    pub primary_id: ReplicaId,
    pub replica_id: ReplicaId,
    pub is_primary: bool,
    pub phase: Phase,
}

/// One BFT replica: voting state, a reference to the local kernel, and the
/// means to talk to its peers.
pub struct BftEngine<S> {
    pub(crate) id: ReplicaId,
    pub(crate) peers: Vec<PeerDescriptor>,
    pub(crate) n: u32,
    pub(crate) sender: S,
    pub(crate) kernel: StateMachine,
    /// Test affordance: when set, this replica's digest function
    /// always returns a fixed bogus value, so honest replicas reject its
    /// PrePrepares or Prepares.
    pub(crate) malicious: bool,
    pub(crate) state: Mutex<BftState>,
    pub(crate) view_change_deadline: Mutex<Instant>,
    pub(crate) applied: Mutex<HashMap<(ViewNumber, SeqNumber), Reply>>,
    pub(crate) applied_cv: Condvar,
}

impl<S> BftEngine<S> {
    /// Boots a replica in view 0 as a non-primary (unless `id` happens to be
    /// the view-0 primary) — see the durability note in [`state::BftState`].
    pub fn new(id: ReplicaId, peers: Vec<PeerDescriptor>, sender: S, malicious: bool) -> Self {
        let n = peers.len() as u32 + 1;
        Self {
            id,
            peers,
            n,
            sender,
            kernel: StateMachine::new(),
            malicious,
            state: Mutex::new(BftState::new(id)),
            view_change_deadline: Mutex::new(Instant::now() + VIEW_CHANGE_TIMEOUT),
            applied: Mutex::new(HashMap::new()),
            applied_cv: Condvar::new(),
        }
    }

    /// The digest function this replica uses for an operation. Always
    /// returns a fixed bogus value when `malicious` is set.
    pub(crate) fn digest_of(&self, bytes: &[u8]) -> Digest {
        if self.malicious {
            Digest::bogus()
        } else {
            Digest::of(bytes)
        }
    }

    pub(crate) fn reset_view_change_deadline(&self) {
        *self.view_change_deadline.lock().expect("view-change deadline mutex poisoned") =
            Instant::now() + VIEW_CHANGE_TIMEOUT;
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.state.lock().expect("replica state mutex poisoned");
        EngineStatus {
            view: state.view,
            last_sequence: state.highest_seq_assigned,
            primary_id: BftState::primary_for(state.view, self.n),
            replica_id: self.id,
            is_primary: state.is_primary(self.n),
            phase: state.phase,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.kernel.get(key)
    }

    pub fn data_len(&self) -> usize {
        self.kernel.len()
    }
}

impl<S> BftEngine<S>
where
    S: qkv_transport::PeerSender<PeerRequest, PeerReply>,
{
    /// Dispatches one incoming peer or client RPC to the appropriate
    /// handler.
    pub fn handle_peer_request(&self, req: PeerRequest) -> PeerReply {
        match req {
            PeerRequest::PrePrepare(msg) => PeerReply::Accepted(self.handle_pre_prepare(msg)),
            PeerRequest::Prepare(msg) => PeerReply::Accepted(self.handle_prepare(msg)),
            PeerRequest::Commit(msg) => PeerReply::Accepted(self.handle_commit(msg)),
            PeerRequest::ViewChange(msg) => PeerReply::Accepted(self.handle_view_change(msg)),
            PeerRequest::NewView(msg) => PeerReply::Accepted(self.handle_new_view(msg)),
            PeerRequest::Request(msg) => PeerReply::Request(self.handle_client_request(msg)),
            PeerRequest::GetStatus(_) => {
                let status = self.status();
                PeerReply::Status(StatusReply {
                    view: status.view,
                    last_sequence: status.last_sequence,
                    primary_id: status.primary_id,
                    replica_id: status.replica_id,
                    is_primary: status.is_primary,
                    state: format!("{:?}", status.phase),
                })
            }
        }
    }

    fn handle_client_request(&self, msg: RequestMessage) -> RequestReply {
        self.submit(msg.request)
    }
}
