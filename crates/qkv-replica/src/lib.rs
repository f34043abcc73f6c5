//! # qkv-replica: the replica process shell
//!
//! Boots whichever engine a [`qkv_config::ClusterConfig`] selects, wires it
//! to the TCP transport and the partition filter, and serves its RPC
//! surface on one listening socket. `qkv-cft` and `qkv-bft` know
//! nothing about sockets or configuration files; this crate is where those
//! pure engines meet the process.

mod bft;
mod cft;
mod filtered_sender;

pub use bft::{boot as boot_bft, BftReplicaHandle, BftRequest, BftReply};
pub use cft::{boot as boot_cft, CftReplicaHandle, CftRequest, CftReply};

use std::net::TcpListener;

use anyhow::{Context, Result};
use qkv_config::{ClusterConfig, EngineKind};

/// A running replica process, regardless of which engine it wraps.
pub enum ReplicaHandle {
    Cft(CftReplicaHandle),
    Bft(BftReplicaHandle),
}

impl ReplicaHandle {
    /// Stops the background loops and the transport server.
    pub fn stop(self) {
        match self {
            ReplicaHandle::Cft(handle) => handle.stop(),
            ReplicaHandle::Bft(handle) => handle.stop(),
        }
    }
}

/// Binds `config`'s listen address and boots the engine it selects.
pub fn boot(config: &ClusterConfig) -> Result<ReplicaHandle> {
    let addr = config
        .bind_addr()
        .with_context(|| format!("replica id {} is not a member of its own cluster config", config.replica_id))?;
    let listener = TcpListener::bind(&addr).with_context(|| format!("failed to bind {addr}"))?;

    match config.engine {
        EngineKind::Cft => Ok(ReplicaHandle::Cft(boot_cft(config, listener)?)),
        EngineKind::Bft => Ok(ReplicaHandle::Bft(boot_bft(config, listener)?)),
    }
}
