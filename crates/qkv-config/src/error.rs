//! Configuration error types. Configuration errors are fatal at boot,
//! surfaced through `anyhow::Context` at the CLI boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to build configuration from sources: {0}")]
    Build(#[from] config::ConfigError),

    #[error("replica id {0} is not a member of its own cluster config")]
    SelfNotAMember(u32),

    #[error("cluster config must list at least one member")]
    EmptyMembership,

    #[error("member list contains duplicate replica id {0}")]
    DuplicateMemberId(u32),
}
