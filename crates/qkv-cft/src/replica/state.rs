//! CFT replica state and the pure decision functions that operate on
//! it. Mutation happens in place, under the mutex the engine shell owns
//! — the functions here never perform IO or send a message
//! themselves, they only decide what the shell should do next.

use std::collections::HashMap;

use qkv_types::{Command, LogEntry, LogIndex, ReplicaId, Term};
use qkv_wal::PersistentState;

use crate::message::{AppendEntriesRequest, AppendEntriesReply, RequestVoteRequest, RequestVoteReply};

/// The role a replica can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// All mutable state for one CFT replica: the durable tuple plus the
/// volatile fields rebuilt at boot.
pub struct ReplicaState {
    pub id: ReplicaId,
    pub role: Role,
    pub persistent: PersistentState,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub next_index: HashMap<ReplicaId, LogIndex>,
    pub match_index: HashMap<ReplicaId, LogIndex>,
    /// The leader this replica most recently heard from or voted for,
    /// surfaced as a hint in `SubmitCommand` rejections.
    pub leader_hint: Option<ReplicaId>,
}

impl ReplicaState {
    /// Rebuilds volatile state for a freshly booted replica: always starts
    /// as Follower regardless of the role it held before a restart.
    pub fn recover(id: ReplicaId, persistent: PersistentState) -> Self {
        Self {
            id,
            role: Role::Follower,
            persistent,
            commit_index: LogIndex::ZERO,
            last_applied: LogIndex::ZERO,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            leader_hint: None,
        }
    }

    pub fn current_term(&self) -> Term {
        self.persistent.current_term
    }

    pub fn log_len(&self) -> LogIndex {
        LogIndex::new(self.persistent.log.len() as u64)
    }

    pub fn last_log_term(&self) -> Term {
        self.persistent
            .log
            .last()
            .map(|entry| entry.term)
            .unwrap_or(Term::ZERO)
    }

    /// Returns the entry at 1-indexed `index`, if any.
    pub fn entry_at(&self, index: LogIndex) -> Option<&LogEntry> {
        if index == LogIndex::ZERO {
            return None;
        }
        self.persistent.log.get(index.as_u64() as usize - 1)
    }

    /// Reverts to Follower for `term`, clearing the vote.
    pub fn step_down(&mut self, term: Term) {
        self.persistent.current_term = term;
        self.persistent.voted_for = None;
        self.role = Role::Follower;
    }

    /// Decides whether to grant a vote to `req` and updates state
    /// accordingly. The caller is responsible for persisting afterward and
    /// resetting the election timer if the vote was granted.
    pub fn decide_vote(&mut self, req: &RequestVoteRequest) -> RequestVoteReply {
        if req.term > self.current_term() {
            self.step_down(req.term);
        }

        if req.term < self.current_term() {
            return RequestVoteReply { term: self.current_term(), vote_granted: false };
        }

        let already_voted_other = matches!(self.persistent.voted_for, Some(id) if id != req.candidate_id);
        let candidate_up_to_date = req.last_log_term > self.last_log_term()
            || (req.last_log_term == self.last_log_term() && req.last_log_index >= self.log_len());

        if already_voted_other || !candidate_up_to_date {
            return RequestVoteReply { term: self.current_term(), vote_granted: false };
        }

        self.persistent.voted_for = Some(req.candidate_id);
        self.leader_hint = Some(req.candidate_id);
        RequestVoteReply { term: self.current_term(), vote_granted: true }
    }

    /// Handles an incoming `AppendEntries`, applying the log-matching,
    /// truncation, and commit-advancement rules.
    pub fn handle_append_entries(&mut self, req: &AppendEntriesRequest) -> AppendEntriesReply {
        if req.term < self.current_term() {
            return AppendEntriesReply {
                term: self.current_term(),
                success: false,
                match_length: self.log_len(),
            };
        }

        if req.term > self.current_term() {
            self.step_down(req.term);
        } else {
            self.role = Role::Follower;
        }
        self.leader_hint = Some(req.leader_id);

        if req.prev_log_index != LogIndex::ZERO {
            match self.entry_at(req.prev_log_index) {
                Some(entry) if entry.term == req.prev_log_term => {}
                _ => {
                    return AppendEntriesReply {
                        term: self.current_term(),
                        success: false,
                        match_length: self.log_len(),
                    };
                }
            }
        }

        let mut next_index = req.prev_log_index.as_u64() as usize;
        for entry in &req.entries {
            if let Some(existing) = self.persistent.log.get(next_index) {
                if existing.term != entry.term {
                    self.persistent.log.truncate(next_index);
                    self.persistent.log.push(entry.clone());
                }
            } else {
                self.persistent.log.push(entry.clone());
            }
            next_index += 1;
        }

        if req.leader_commit > self.commit_index {
            self.commit_index = req.leader_commit.min(self.log_len());
        }

        AppendEntriesReply {
            term: self.current_term(),
            success: true,
            match_length: self.log_len(),
        }
    }

    /// Appends a new entry proposed by this replica as Leader.
    /// Caller must confirm `self.role == Role::Leader` first.
    pub fn append_local(&mut self, command: Command) -> LogIndex {
        let entry = LogEntry::new(self.current_term(), command);
        self.persistent.log.push(entry);
        self.log_len()
    }

    /// The largest `N` a majority of `match_index` values supports,
    /// restricted to entries from the current term. `cluster_size`
    /// includes this replica.
    pub fn majority_commit_index(&self, cluster_size: usize) -> Option<LogIndex> {
        let majority = cluster_size / 2 + 1;
        let mut candidate = self.log_len().as_u64();

        while candidate > self.commit_index.as_u64() {
            let index = LogIndex::new(candidate);
            let have_it = self
                .match_index
                .values()
                .filter(|&&m| m >= index)
                .count()
                + 1; // count self

            let term_matches = self
                .entry_at(index)
                .map(|entry| entry.term == self.current_term())
                .unwrap_or(false);

            if have_it >= majority && term_matches {
                return Some(index);
            }
            candidate -= 1;
        }
        None
    }
}
