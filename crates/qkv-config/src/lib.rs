//! Cluster configuration for a `quorumkv` replica.
//!
//! A `ClusterConfig` is a TOML file plus environment overrides describing
//! the fixed ⟨id, ip, port⟩ member list, this replica's own id, which
//! engine it runs (CFT or BFT — never both), and the BFT malicious-mode
//! test flag. The member set is fixed at boot; there is no
//! reconfiguration RPC.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use qkv_types::{PeerDescriptor, ReplicaId};

/// Which consensus engine this replica runs. Selected by configuration,
/// fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Cft,
    Bft,
}

impl Default for EngineKind {
    fn default() -> Self {
        Self::Cft
    }
}

/// One ⟨id, ip, port⟩ cluster member record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: u32,
    pub host: String,
    pub port: u16,
}

/// The full configuration a replica boots from: identical on every replica
/// except for `replica_id` and, for BFT test runs, `malicious`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub engine: EngineKind,
    pub replica_id: u32,
    pub members: Vec<MemberConfig>,
    pub data_dir: PathBuf,
    /// BFT-only test affordance: causes this replica's digest
    /// function to always return a fixed bogus value. Ignored by the CFT
    /// engine.
    pub malicious: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Cft,
            replica_id: 1,
            members: vec![MemberConfig { id: 1, host: "127.0.0.1".to_string(), port: 5001 }],
            data_dir: PathBuf::from("./data"),
            malicious: false,
        }
    }
}

impl ClusterConfig {
    pub fn self_id(&self) -> ReplicaId {
        ReplicaId::new(self.replica_id)
    }

    /// This replica's own member record.
    pub fn self_member(&self) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.id == self.replica_id)
    }

    /// The bind address for this replica's transport server.
    pub fn bind_addr(&self) -> Option<String> {
        self.self_member().map(|m| format!("{}:{}", m.host, m.port))
    }

    /// Every other member as a [`PeerDescriptor`], excluding self — the
    /// shape both engines expect their peer list in.
    pub fn peers(&self) -> Vec<PeerDescriptor> {
        self.members
            .iter()
            .filter(|m| m.id != self.replica_id)
            .map(|m| PeerDescriptor::new(ReplicaId::new(m.id), m.host.clone(), m.port))
            .collect()
    }

    /// Validates the loaded configuration: non-empty membership, no
    /// duplicate ids, and self must be a listed member.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.members.is_empty() {
            return Err(ConfigError::EmptyMembership);
        }

        let mut seen = std::collections::HashSet::new();
        for member in &self.members {
            if !seen.insert(member.id) {
                return Err(ConfigError::DuplicateMemberId(member.id));
            }
        }

        if self.self_member().is_none() {
            return Err(ConfigError::SelfNotAMember(self.replica_id));
        }

        Ok(())
    }

    /// Cluster size `N`, used by both engines' quorum arithmetic.
    pub fn cluster_size(&self) -> usize {
        self.members.len()
    }
}
