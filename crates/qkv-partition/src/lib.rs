//! Per-replica allow-list partition filter.
//!
//! A trivial allow-list gate in front of the transport, used only by tests
//! to simulate network partitions. Outbound peer RPCs short-circuit to "no
//! response" when the destination matches either list; inbound RPCs whose
//! source matches either list are aborted before reaching the engine.

use std::collections::HashSet;
use std::sync::RwLock;

use qkv_types::ReplicaId;
use serde::{Deserialize, Serialize};

/// The configuration applied by the administrative `SetPartition` RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub blocked_node_ids: Vec<ReplicaId>,
    pub blocked_ips: Vec<String>,
}

/// Thread-safe partition filter. Cheap to check on every RPC: a read lock
/// over two small sets.
#[derive(Default)]
pub struct PartitionFilter {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    blocked_node_ids: HashSet<ReplicaId>,
    blocked_ips: HashSet<String>,
}

impl PartitionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current allow-list configuration. Used only by the
    /// `SetPartition` admin RPC.
    pub fn set(&self, spec: PartitionSpec) {
        let mut inner = self.inner.write().expect("partition filter lock poisoned");
        inner.blocked_node_ids = spec.blocked_node_ids.into_iter().collect();
        inner.blocked_ips = spec.blocked_ips.into_iter().collect();
    }

    /// Returns `true` if an outbound RPC to `peer` (id and host) should be
    /// sent — `false` means short-circuit to "no response".
    pub fn allows_outbound(&self, peer: ReplicaId, host: &str) -> bool {
        let inner = self.inner.read().expect("partition filter lock poisoned");
        !inner.blocked_node_ids.contains(&peer) && !inner.blocked_ips.contains(host)
    }

    /// Returns `true` if an inbound RPC from `source` (id and host) should
    /// reach the engine — `false` means abort with "unavailable" before
    /// dispatch.
    pub fn allows_inbound(&self, source: ReplicaId, host: &str) -> bool {
        self.allows_outbound(source, host)
    }

    /// Same check as [`PartitionFilter::allows_inbound`] for traffic whose
    /// claimed sender id cannot be trusted or extracted (e.g. a client
    /// request, as opposed to peer-to-peer protocol traffic) — only the
    /// source host is checked.
    pub fn allows_inbound_from_host(&self, host: &str) -> bool {
        let inner = self.inner.read().expect("partition filter lock poisoned");
        !inner.blocked_ips.contains(host)
    }
}
