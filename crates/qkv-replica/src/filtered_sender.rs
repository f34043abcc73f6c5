//! Wraps a concrete [`PeerSender`] with the per-replica partition filter
//!: outbound RPCs to a blocked peer short-circuit to "no response"
//! before ever touching the network.

use std::sync::Arc;
use std::time::Duration;

use qkv_partition::PartitionFilter;
use qkv_transport::PeerSender;
use qkv_types::PeerDescriptor;

pub struct FilteredSender<Inner> {
    inner: Inner,
    filter: Arc<PartitionFilter>,
}

impl<Inner> FilteredSender<Inner> {
    pub fn new(inner: Inner, filter: Arc<PartitionFilter>) -> Self {
        Self { inner, filter }
    }
}

impl<Req, Rep, Inner> PeerSender<Req, Rep> for FilteredSender<Inner>
where
    Inner: PeerSender<Req, Rep>,
{
    fn send(&self, peer: &PeerDescriptor, request: &Req, deadline: Duration) -> Option<Rep> {
        if !self.filter.allows_outbound(peer.id, &peer.host) {
            return None;
        }
        self.inner.send(peer, request, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkv_partition::PartitionSpec;
    use qkv_types::ReplicaId;
    use std::sync::Mutex;

    struct RecordingSender {
        calls: Mutex<Vec<ReplicaId>>,
    }

    impl PeerSender<(), ()> for RecordingSender {
        fn send(&self, peer: &PeerDescriptor, _request: &(), _deadline: Duration) -> Option<()> {
            self.calls.lock().unwrap().push(peer.id);
            Some(())
        }
    }

    #[test]
    fn blocked_peer_never_reaches_the_inner_sender() {
        let filter = Arc::new(PartitionFilter::new());
        filter.set(PartitionSpec { blocked_node_ids: vec![ReplicaId::new(2)], blocked_ips: vec![] });
        let inner = RecordingSender { calls: Mutex::new(Vec::new()) };
        let sender = FilteredSender::new(inner, filter);

        let blocked_peer = PeerDescriptor::new(ReplicaId::new(2), "localhost", 1);
        let allowed_peer = PeerDescriptor::new(ReplicaId::new(3), "localhost", 1);

        assert_eq!(sender.send(&blocked_peer, &(), Duration::from_millis(10)), None);
        assert_eq!(sender.send(&allowed_peer, &(), Duration::from_millis(10)), Some(()));
        assert_eq!(sender.inner.calls.lock().unwrap().as_slice(), &[ReplicaId::new(3)]);
    }
}
