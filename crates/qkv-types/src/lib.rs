//! Shared identifiers and wire-level value types for `quorumkv`.
//!
//! These types are deliberately thin newtypes over primitive integers: they
//! exist so the CFT and BFT engines can't accidentally compare a term to a
//! log index, not to carry behavior of their own.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one replica in the cluster. Small positive integer, 1-indexed
/// to match the protocol arithmetic in both engines (`(view mod N) + 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(u32);

impl ReplicaId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monotonically non-decreasing election epoch.
///
/// Used as `Term` in the CFT engine and as `View` in the BFT engine — same
/// representation, different name at each call site via a type alias so the
/// two engines read naturally in their own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Epoch(u64);

impl Epoch {
    pub const ZERO: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Election epoch in the CFT engine.
pub type Term = Epoch;

/// Election epoch in the BFT engine.
pub type ViewNumber = Epoch;

/// A 1-indexed position in the replicated log (CFT) or the BFT sequence
/// space. Index 0 is reserved to mean "before the first entry", matching
/// Raft's `prev_log_index = 0` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct LogIndex(u64);

impl LogIndex {
    pub const ZERO: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub fn saturating_sub(self, rhs: u64) -> Self {
        Self(self.0.saturating_sub(rhs))
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence number assigned by a BFT primary to a request. Reuses `LogIndex`'s
/// representation since both count "the nth operation this epoch has seen".
pub type SeqNumber = LogIndex;

/// An opaque command payload interpreted by the state machine. Stored
/// verbatim in the log; the kernel is the only code that parses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command(pub Vec<u8>);

impl Command {
    pub fn from_str(s: impl Into<String>) -> Self {
        Self(s.into().into_bytes())
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in the CFT replicated log: the term it was proposed in, and the
/// opaque command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub command: Command,
}

impl LogEntry {
    pub fn new(term: Term, command: Command) -> Self {
        Self { term, command }
    }
}

/// A cryptographic digest (BLAKE3) binding a BFT proposal to a specific
/// client operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// A fixed, deterministically-wrong digest used by the malicious-replica
    /// test affordance: never equals a real `Digest::of` output for
    /// any non-empty input with overwhelming probability.
    pub fn bogus() -> Self {
        Self([0xFF; 32])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…")
    }
}

/// Immutable description of a cluster member, shared by value between the
/// replica shell, the transport, and both engines. Engines never hold a
/// live connection or a back-pointer to the shell — only this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub id: ReplicaId,
    pub host: String,
    pub port: u16,
}

impl PeerDescriptor {
    pub fn new(id: ReplicaId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica {} ({})", self.id, self.addr())
    }
}
