//! # qkv-bft: Byzantine-fault-tolerant three-phase replication engine
//!
//! A fixed cluster of `N = 3f+1` replicas runs the pre-prepare / prepare /
//! commit voting machine: the primary for the current view proposes,
//! backups vote in two rounds, and a request executes once `2f+1` replicas
//! agree on its digest. View change replaces an unresponsive or Byzantine
//! primary; `NewView` carries the proof and reassigns any sequence the old
//! primary left unfinished before the new primary accepts client traffic.
//!
//! Generalizes `qkv_cft`'s split between pure decision state and the engine
//! shell that owns the mutex and talks to peers through a
//! [`qkv_transport::PeerSender`].

mod loops;
mod message;
mod replica;

pub use loops::{spawn_background_loops, EngineLoopHandle};
pub use message::{
    AcceptedReply, ClientRequest, CommitMessage, GetStatusRequest, NewViewMessage, PeerReply, PeerRequest,
    PrePrepareMessage, PreparedSlot, PrepareMessage, RequestMessage, RequestReply, StatusReply, ViewChangeMessage,
};
pub use replica::{BftEngine, EngineStatus, Phase};

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use qkv_types::{PeerDescriptor, ReplicaId};

    use super::*;
    use crate::replica::BftEngine;

    /// In-process `PeerSender` double routing directly to another engine's
    /// `handle_peer_request`, the same style `qkv_cft`'s replication tests
    /// use for a loopback cluster.
    struct LoopbackSender {
        engines: Mutex<HashMap<ReplicaId, Arc<BftEngine<Arc<LoopbackSender>>>>>,
    }

    impl LoopbackSender {
        fn new() -> Arc<Self> {
            Arc::new(Self { engines: Mutex::new(HashMap::new()) })
        }

        fn register(&self, id: ReplicaId, engine: Arc<BftEngine<Arc<LoopbackSender>>>) {
            self.engines.lock().unwrap().insert(id, engine);
        }
    }

    impl qkv_transport::PeerSender<PeerRequest, PeerReply> for Arc<LoopbackSender> {
        fn send(&self, peer: &PeerDescriptor, request: &PeerRequest, _deadline: Duration) -> Option<PeerReply> {
            let engines = self.engines.lock().unwrap();
            let engine = engines.get(&peer.id)?;
            Some(engine.handle_peer_request(request.clone()))
        }
    }

    fn build_cluster(n: u32, malicious: &[u32]) -> (Arc<LoopbackSender>, Vec<Arc<BftEngine<Arc<LoopbackSender>>>>) {
        let shared = LoopbackSender::new();
        let ids: Vec<ReplicaId> = (1..=n).map(ReplicaId::new).collect();
        let descriptors: Vec<PeerDescriptor> =
            ids.iter().map(|&id| PeerDescriptor::new(id, "localhost", 20000 + id.as_u32() as u16)).collect();

        let mut engines = Vec::new();
        for &id in &ids {
            let peers: Vec<PeerDescriptor> = descriptors.iter().filter(|p| p.id != id).cloned().collect();
            let is_malicious = malicious.contains(&id.as_u32());
            let engine = Arc::new(BftEngine::new(id, peers, Arc::clone(&shared), is_malicious));
            shared.register(id, Arc::clone(&engine));
            engines.push(engine);
        }
        (shared, engines)
    }

    fn request(op: &str) -> ClientRequest {
        ClientRequest { operation: qkv_types::Command::from_str(op), timestamp: 1, client_id: 1 }
    }

    #[test]
    fn honest_cluster_executes_a_request() {
        let (_shared, engines) = build_cluster(4, &[]);
        let primary = &engines[0];
        assert!(primary.status().is_primary);

        let reply = primary.submit(request("SET A=10"));
        assert!(reply.success, "{reply:?}");

        for engine in &engines {
            assert_eq!(engine.get("A"), Some("10".to_string()));
        }
    }

    #[test]
    fn cluster_tolerates_one_malicious_backup() {
        let (_shared, engines) = build_cluster(4, &[4]);
        let primary = &engines[0];

        let reply = primary.submit(request("SET B=20"));
        assert!(reply.success, "{reply:?}");

        for engine in &engines[..3] {
            assert_eq!(engine.get("B"), Some("20".to_string()));
        }
    }

    #[test]
    fn backup_rejects_pre_prepare_with_wrong_digest() {
        let (_shared, engines) = build_cluster(4, &[]);
        let backup = &engines[1];

        let reply = backup.handle_peer_request(PeerRequest::PrePrepare(PrePrepareMessage {
            view: qkv_types::Epoch::ZERO,
            seq: qkv_types::LogIndex::new(1),
            digest: qkv_types::Digest::bogus(),
            request: request("SET C=1"),
            primary_id: ReplicaId::new(1),
        }));
        assert!(matches!(reply, PeerReply::Accepted(AcceptedReply { accepted: false })));
    }

    #[test]
    fn non_primary_redirects_client_request() {
        let (_shared, engines) = build_cluster(4, &[]);
        let backup = &engines[1];

        let reply = backup.submit(request("SET D=1"));
        assert!(!reply.success);
        assert!(reply.result.contains("not primary"));
    }

    #[test]
    fn view_change_elects_new_primary_on_quorum() {
        let (_shared, engines) = build_cluster(4, &[]);

        for engine in &engines[1..] {
            engine.view_change_tick_for_test();
        }

        for engine in &engines {
            assert_eq!(engine.status().view, qkv_types::Epoch::new(1));
        }
        assert!(engines[1].status().is_primary);
    }

    impl<S> BftEngine<S>
    where
        S: qkv_transport::PeerSender<PeerRequest, PeerReply>,
    {
        fn view_change_tick_for_test(&self) {
            self.start_view_change_for_test();
        }

        fn start_view_change_for_test(&self) {
            self.start_view_change();
        }
    }
}
