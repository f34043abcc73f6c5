//! CFT peer-to-peer RPC messages.
//!
//! All three RPC kinds are folded into one request/reply enum pair so a
//! single TCP port can carry all peer traffic.

use serde::{Deserialize, Serialize};

use qkv_types::{LogEntry, LogIndex, ReplicaId, Term};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: ReplicaId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: ReplicaId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: Term,
    pub success: bool,
    /// Length of the replying replica's log after applying this request, so
    /// the leader can set `match_index` precisely even when `entries` was
    /// sent speculatively ahead of what the follower could accept.
    pub match_length: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {
    pub sender_id: ReplicaId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReply {
    pub receiver_id: ReplicaId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerRequest {
    RequestVote(RequestVoteRequest),
    AppendEntries(AppendEntriesRequest),
    Ping(PingRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerReply {
    RequestVote(RequestVoteReply),
    AppendEntries(AppendEntriesReply),
    Ping(PingReply),
    /// Returned when the reply variant could not be produced (used only by
    /// in-process test doubles; the TCP transport never sends this).
    None,
}
