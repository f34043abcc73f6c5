//! BFT peer-to-peer and client RPC messages.
//!
//! One envelope per direction, the same single-port-multiple-message-kinds
//! shape `qkv-cft::message` uses, generalized from two phases to three plus
//! view change.

use serde::{Deserialize, Serialize};

use qkv_types::{Command, Digest, ReplicaId, SeqNumber, ViewNumber};

/// A client's operation, as carried by `Request` and embedded in
/// `PrePrepare` once the primary has accepted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    pub operation: Command,
    pub timestamp: u64,
    pub client_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrePrepareMessage {
    pub view: ViewNumber,
    pub seq: SeqNumber,
    pub digest: Digest,
    pub request: ClientRequest,
    pub primary_id: ReplicaId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrepareMessage {
    pub view: ViewNumber,
    pub seq: SeqNumber,
    pub digest: Digest,
    pub replica_id: ReplicaId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommitMessage {
    pub view: ViewNumber,
    pub seq: SeqNumber,
    pub digest: Digest,
    pub replica_id: ReplicaId,
}

/// One slot this replica has a durable Prepare-quorum for but has not yet
/// executed, carried in `ViewChange` so the new primary can rebuild it in
/// the new view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedSlot {
    pub seq: SeqNumber,
    pub digest: Digest,
    pub request: ClientRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewChangeMessage {
    pub new_view: ViewNumber,
    pub last_seq: SeqNumber,
    pub replica_id: ReplicaId,
    /// Unfinished slots above `last_seq` this replica can attest to.
    pub prepared: Vec<PreparedSlot>,
}

/// Proof a view change is legitimate: the `2f+1` `ViewChange` votes the new
/// primary collected, plus the PrePrepares it reissues for any sequence left
/// unfinished by the old primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewViewMessage {
    pub new_view: ViewNumber,
    pub view_change_proof: Vec<ViewChangeMessage>,
    pub reassigned: Vec<PrePrepareMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub request: ClientRequest,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GetStatusRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerRequest {
    PrePrepare(PrePrepareMessage),
    Prepare(PrepareMessage),
    Commit(CommitMessage),
    ViewChange(ViewChangeMessage),
    NewView(NewViewMessage),
    Request(RequestMessage),
    GetStatus(GetStatusRequest),
}

/// All replies carry a single `accepted` flag except `GetStatus` and
/// `Request`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AcceptedReply {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    pub view: ViewNumber,
    pub last_sequence: SeqNumber,
    pub primary_id: ReplicaId,
    pub replica_id: ReplicaId,
    pub is_primary: bool,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestReply {
    pub view: ViewNumber,
    pub timestamp: u64,
    pub replica_id: ReplicaId,
    pub success: bool,
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerReply {
    Accepted(AcceptedReply),
    Status(StatusReply),
    Request(RequestReply),
    /// Used only by in-process test doubles; the TCP transport never sends
    /// this (mirrors `qkv_cft::message::PeerReply::None`).
    None,
}

impl AcceptedReply {
    pub fn yes() -> Self {
        Self { accepted: true }
    }

    pub fn no() -> Self {
        Self { accepted: false }
    }
}
