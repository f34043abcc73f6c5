//! Replica shell for the BFT engine: boots a [`qkv_bft::BftEngine`] from a
//! [`ClusterConfig`], wires the partition filter into both directions of
//! traffic, starts the background loops, and serves the peer/client RPC
//! surface on one TCP port.

use std::net::{IpAddr, TcpListener};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use qkv_bft::{BftEngine, EngineLoopHandle, PeerReply as BftPeerReply, PeerRequest as BftPeerRequest};
use qkv_config::ClusterConfig;
use qkv_partition::{PartitionFilter, PartitionSpec};
use qkv_transport::{ServerHandle, TcpPeerSender};
use qkv_types::ReplicaId;

use crate::filtered_sender::FilteredSender;

type BftSender = FilteredSender<TcpPeerSender>;

/// The request envelope carried on a BFT replica's single TCP port: peer and
/// client protocol traffic plus the partition-test admin call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BftRequest {
    Peer(BftPeerRequest),
    SetPartition(PartitionSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BftReply {
    Peer(BftPeerReply),
    SetPartition { success: bool, message: String },
}

/// Extracts the claimed sender id from a peer RPC, for inbound
/// partition-filter checks. `None` for RPCs with no single
/// identifiable sender field (a client's `Request`, or `GetStatus`).
fn claimed_sender(req: &BftPeerRequest) -> Option<ReplicaId> {
    match req {
        BftPeerRequest::PrePrepare(m) => Some(m.primary_id),
        BftPeerRequest::Prepare(m) => Some(m.replica_id),
        BftPeerRequest::Commit(m) => Some(m.replica_id),
        BftPeerRequest::ViewChange(m) => Some(m.replica_id),
        BftPeerRequest::NewView(_) => None,
        BftPeerRequest::Request(_) => None,
        BftPeerRequest::GetStatus(_) => None,
    }
}

/// A running BFT replica: the engine, its background loops, and its
/// listening TCP server. Dropping this does not stop anything — call
/// [`BftReplicaHandle::stop`] for an orderly shutdown.
pub struct BftReplicaHandle {
    pub engine: Arc<BftEngine<BftSender>>,
    filter: Arc<PartitionFilter>,
    loops: Option<EngineLoopHandle>,
    server: Option<ServerHandle>,
}

impl BftReplicaHandle {
    pub fn stop(mut self) {
        if let Some(server) = self.server.take() {
            server.stop();
        }
        if let Some(loops) = self.loops.take() {
            loops.stop();
        }
    }
}

/// Boots a BFT replica from `config` and starts serving on `listener`
///. BFT carries no durable state; a crashed replica rejoins via view change.
pub fn boot(config: &ClusterConfig, listener: TcpListener) -> Result<BftReplicaHandle> {
    let filter = Arc::new(PartitionFilter::new());
    let sender = FilteredSender::new(TcpPeerSender, Arc::clone(&filter));

    let engine = Arc::new(BftEngine::new(config.self_id(), config.peers(), sender, config.malicious));
    let loops = qkv_bft::spawn_background_loops(Arc::clone(&engine));

    let handler_engine = Arc::clone(&engine);
    let handler_filter = Arc::clone(&filter);
    let server = qkv_transport::serve(listener, move |req: BftRequest, peer_ip: IpAddr| {
        dispatch(&handler_engine, &handler_filter, req, peer_ip)
    });

    tracing::info!(replica = %config.self_id(), malicious = config.malicious, "BFT replica booted");

    Ok(BftReplicaHandle { engine, filter, loops: Some(loops), server: Some(server) })
}

fn dispatch(engine: &BftEngine<BftSender>, filter: &PartitionFilter, req: BftRequest, peer_ip: IpAddr) -> BftReply {
    match req {
        BftRequest::Peer(peer_req) => {
            let host = peer_ip.to_string();
            let allowed = match claimed_sender(&peer_req) {
                Some(id) => filter.allows_inbound(id, &host),
                None => filter.allows_inbound_from_host(&host),
            };
            if !allowed {
                tracing::debug!(%peer_ip, "rejecting inbound RPC: partitioned");
                return BftReply::Peer(BftPeerReply::None);
            }
            BftReply::Peer(engine.handle_peer_request(peer_req))
        }
        BftRequest::SetPartition(spec) => {
            filter.set(spec);
            BftReply::SetPartition { success: true, message: "partition configuration updated".to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkv_bft::{ClientRequest, RequestMessage};
    use qkv_config::MemberConfig;
    use qkv_types::Command;
    use std::net::TcpListener;
    use std::time::Duration;

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn non_primary_redirects_client_requests() {
        let port = free_port();
        let config = ClusterConfig {
            engine: qkv_config::EngineKind::Bft,
            replica_id: 2,
            members: vec![
                MemberConfig { id: 1, host: "127.0.0.1".into(), port: free_port() },
                MemberConfig { id: 2, host: "127.0.0.1".into(), port },
            ],
            ..ClusterConfig::default()
        };
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        let handle = boot(&config, listener).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let request = RequestMessage {
            request: ClientRequest { operation: Command::from_str("SET A=1"), timestamp: 1, client_id: 1 },
        };
        let reply = handle.engine.handle_peer_request(BftPeerRequest::Request(request));
        match reply {
            BftPeerReply::Request(r) => assert!(!r.success),
            other => panic!("unexpected reply: {other:?}"),
        }

        handle.stop();
    }
}
