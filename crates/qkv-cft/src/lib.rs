//! # qkv-cft: crash-fault-tolerant leader-based replication engine
//!
//! A Raft-style engine: a replica is always exactly one of Follower,
//! Candidate, or Leader. Leader election uses randomized timeouts
//! to break split votes; the elected leader replicates its log via
//! `AppendEntries` heartbeats and advances `commit_index` only over entries
//! from its own term, the safety-critical rule that prevents a
//! leader from committing a prior-term entry by count alone.
//!
//! Durable state (`current_term`, `voted_for`, `log`) is persisted through
//! [`qkv_wal::Wal`] before any reply a peer could rely on; the
//! engine never replies to a protocol message whose precondition depends on
//! an unpersisted state change.

mod loops;
mod message;
mod replica;

pub use loops::{spawn_background_loops, EngineLoopHandles};
pub use message::{
    AppendEntriesReply, AppendEntriesRequest, PeerReply, PeerRequest, PingReply, PingRequest, RequestVoteReply,
    RequestVoteRequest,
};
pub use replica::{CftEngine, EngineStatus, Role, SubmitOutcome};
