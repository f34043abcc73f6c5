//! BFT replica state and the pure decision functions that operate
//! on it. As in `qkv_cft::replica::state`, mutation happens in place under
//! the mutex the engine shell owns; nothing here performs IO or sends a
//! message itself.

use std::collections::{HashMap, HashSet};

use qkv_types::{Digest, ReplicaId, SeqNumber, ViewNumber};

use crate::message::{ClientRequest, PreparedSlot, ViewChangeMessage};

/// Whether a replica is running the normal three-phase protocol or waiting
/// out a view change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Normal,
    ViewChange,
}

/// Per-⟨view, seq⟩ voting state for one proposal.
#[derive(Debug, Clone)]
pub struct SlotQuorum {
    pub digest: Digest,
    pub request: ClientRequest,
    pub prepare_votes: HashSet<ReplicaId>,
    pub commit_votes: HashSet<ReplicaId>,
}

/// All mutable state for one BFT replica.
///
/// This revision carries no durable WAL format for BFT state (only the CFT
/// durable tuple has one); a restart begins a replica at view 0 as a
/// non-primary rather than recovering its last known view — recorded as a
/// decision in the design ledger.
pub struct BftState {
    pub id: ReplicaId,
    pub view: ViewNumber,
    pub phase: Phase,
    /// Next sequence number this replica expects to execute, across all
    /// views — seq is a single monotonic counter, not reset per view.
    pub next_exec_seq: SeqNumber,
    /// Highest sequence number this replica (as primary) has assigned.
    pub highest_seq_assigned: SeqNumber,
    pub quorums: HashMap<(ViewNumber, SeqNumber), SlotQuorum>,
    pub executed: HashSet<(ViewNumber, SeqNumber)>,
    pub pending: HashMap<Digest, ClientRequest>,
    /// False from the moment this replica adopts a new view as primary
    /// until its `NewView` has been broadcast — the new primary must not
    /// accept client `Request`s before then.
    pub view_active: bool,
    pub view_change_votes: HashMap<ViewNumber, HashMap<ReplicaId, ViewChangeMessage>>,
}

impl BftState {
    pub fn new(id: ReplicaId) -> Self {
        Self {
            id,
            view: ViewNumber::ZERO,
            phase: Phase::Normal,
            next_exec_seq: SeqNumber::new(1),
            highest_seq_assigned: SeqNumber::ZERO,
            quorums: HashMap::new(),
            executed: HashSet::new(),
            pending: HashMap::new(),
            view_active: true,
            view_change_votes: HashMap::new(),
        }
    }

    /// The primary for `view` in a cluster of `n` replicas: `(view mod n) +
    /// 1`, 1-indexed.
    pub fn primary_for(view: ViewNumber, n: u32) -> ReplicaId {
        ReplicaId::new((view.as_u64() % n as u64) as u32 + 1)
    }

    pub fn is_primary(&self, n: u32) -> bool {
        Self::primary_for(self.view, n) == self.id
    }

    /// `f` Byzantine replicas tolerated by a cluster of `n = 3f+1`.
    pub fn max_faults(n: u32) -> u32 {
        (n - 1) / 3
    }

    /// Quorum size `2f+1`.
    pub fn quorum_size(n: u32) -> usize {
        (2 * Self::max_faults(n) + 1) as usize
    }

    fn slot_mut(&mut self, view: ViewNumber, seq: SeqNumber, digest: Digest, request: &ClientRequest) -> &mut SlotQuorum {
        self.quorums.entry((view, seq)).or_insert_with(|| SlotQuorum {
            digest,
            request: request.clone(),
            prepare_votes: HashSet::new(),
            commit_votes: HashSet::new(),
        })
    }

    /// Records this replica's own Prepare vote for a just-accepted
    /// PrePrepare (primary and backup both do this immediately).
    pub fn record_own_prepare(&mut self, view: ViewNumber, seq: SeqNumber, digest: Digest, request: &ClientRequest) {
        let slot = self.slot_mut(view, seq, digest, request);
        slot.prepare_votes.insert(self.id);
        self.highest_seq_assigned = self.highest_seq_assigned.max(seq);
    }

    /// Records a peer's Prepare vote. Returns `true` if this is the first
    /// time the slot reached quorum (the caller should then record its own
    /// Commit vote and broadcast).
    pub fn record_prepare_vote(&mut self, view: ViewNumber, seq: SeqNumber, digest: Digest, voter: ReplicaId, n: u32) -> bool {
        let Some(slot) = self.quorums.get_mut(&(view, seq)) else { return false };
        if slot.digest != digest {
            return false;
        }
        let was_below = slot.prepare_votes.len() < Self::quorum_size(n);
        slot.prepare_votes.insert(voter);
        was_below && slot.prepare_votes.len() >= Self::quorum_size(n)
    }

    /// Records this replica's own Commit vote.
    pub fn record_own_commit(&mut self, view: ViewNumber, seq: SeqNumber) {
        if let Some(slot) = self.quorums.get_mut(&(view, seq)) {
            slot.commit_votes.insert(self.id);
        }
    }

    /// Records a peer's Commit vote. Returns `true` if the slot has now
    /// reached commit quorum and has not yet been executed.
    pub fn record_commit_vote(&mut self, view: ViewNumber, seq: SeqNumber, digest: Digest, voter: ReplicaId, n: u32) -> bool {
        let Some(slot) = self.quorums.get_mut(&(view, seq)) else { return false };
        if slot.digest != digest {
            return false;
        }
        slot.commit_votes.insert(voter);
        slot.commit_votes.len() >= Self::quorum_size(n) && !self.executed.contains(&(view, seq))
    }

    /// Returns the slot for `(view, seq)` if one is stored.
    pub fn slot(&self, view: ViewNumber, seq: SeqNumber) -> Option<&SlotQuorum> {
        self.quorums.get(&(view, seq))
    }

    /// Marks `(view, seq)` executed and advances `next_exec_seq`. Caller
    /// must have already confirmed commit quorum and in-order execution
    ///.
    pub fn mark_executed(&mut self, view: ViewNumber, seq: SeqNumber) {
        self.executed.insert((view, seq));
        self.next_exec_seq = self.next_exec_seq.next();
    }

    /// Unfinished slots above `last_seq` this replica can attest to for a
    /// `ViewChange` — prepared (or better) but not yet executed.
    pub fn prepared_slots_above(&self, last_seq: SeqNumber) -> Vec<PreparedSlot> {
        self.quorums
            .iter()
            .filter(|((view, seq), _)| *view == self.view && *seq > last_seq)
            .map(|(&(_, seq), slot)| PreparedSlot {
                seq,
                digest: slot.digest,
                request: slot.request.clone(),
            })
            .collect()
    }
}
