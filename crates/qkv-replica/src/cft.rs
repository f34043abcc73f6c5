//! Replica shell for the CFT engine: boots a [`qkv_cft::CftEngine`] from a
//! [`ClusterConfig`], wires the partition filter into both directions of
//! traffic, starts the background loops, and serves the peer and
//! client/admin RPC surface on one TCP port.

use std::net::{IpAddr, TcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use qkv_cft::{CftEngine, EngineLoopHandles, PeerReply as CftPeerReply, PeerRequest as CftPeerRequest, SubmitOutcome};
use qkv_config::ClusterConfig;
use qkv_partition::{PartitionFilter, PartitionSpec};
use qkv_transport::{PeerSender, ServerHandle, TcpPeerSender};
use qkv_types::{Command, ReplicaId};
use qkv_wal::Wal;

use crate::filtered_sender::FilteredSender;

type CftSender = FilteredSender<TcpPeerSender>;

/// The request envelope carried on a CFT replica's single TCP port: peer
/// protocol traffic plus the client/admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CftRequest {
    Peer(CftPeerRequest),
    SubmitCommand { command: Command },
    GetState,
    GetData { key: String },
    SetPartition(PartitionSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CftReply {
    Peer(CftPeerReply),
    SubmitCommand { success: bool, message: String, leader_id: Option<u32> },
    GetState { state: String, term: u64, node_id: u32, log_length: u64, commit_index: u64 },
    GetData { success: bool, value: Option<String>, message: String },
    SetPartition { success: bool, message: String },
}

/// Extracts the claimed sender id from a peer RPC, for inbound
/// partition-filter checks. `None` for RPCs with no single
/// identifiable sender field.
fn claimed_sender(req: &CftPeerRequest) -> Option<ReplicaId> {
    match req {
        CftPeerRequest::RequestVote(r) => Some(r.candidate_id),
        CftPeerRequest::AppendEntries(r) => Some(r.leader_id),
        CftPeerRequest::Ping(r) => Some(r.sender_id),
    }
}

/// A running CFT replica: the engine, its background loops, and its
/// listening TCP server. Dropping this does not stop anything — call
/// [`CftReplicaHandle::stop`] for an orderly shutdown.
pub struct CftReplicaHandle {
    pub engine: Arc<CftEngine<CftSender>>,
    filter: Arc<PartitionFilter>,
    loops: Option<EngineLoopHandles>,
    server: Option<ServerHandle>,
}

impl CftReplicaHandle {
    pub fn stop(mut self) {
        if let Some(server) = self.server.take() {
            server.stop();
        }
        if let Some(loops) = self.loops.take() {
            loops.stop();
        }
    }
}

/// Boots a CFT replica from `config` and starts serving on `listener`
///. `config.data_dir` must exist; the WAL file is created under it
/// the first time this replica persists state.
pub fn boot(config: &ClusterConfig, listener: TcpListener) -> Result<CftReplicaHandle> {
    let filter = Arc::new(PartitionFilter::new());
    let sender = FilteredSender::new(TcpPeerSender, Arc::clone(&filter));

    let wal_path = config.data_dir.join(format!("replica-{}.wal", config.replica_id));
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data directory {}", config.data_dir.display()))?;
    let wal = Wal::new(wal_path);

    let engine = Arc::new(CftEngine::new(config.self_id(), config.peers(), wal, sender));
    let loops = qkv_cft::spawn_background_loops(Arc::clone(&engine));

    let handler_engine = Arc::clone(&engine);
    let handler_filter = Arc::clone(&filter);
    let server = qkv_transport::serve(listener, move |req: CftRequest, peer_ip: IpAddr| {
        dispatch(&handler_engine, &handler_filter, req, peer_ip)
    });

    tracing::info!(replica = %config.self_id(), "CFT replica booted");

    Ok(CftReplicaHandle { engine, filter, loops: Some(loops), server: Some(server) })
}

fn dispatch(engine: &CftEngine<CftSender>, filter: &PartitionFilter, req: CftRequest, peer_ip: IpAddr) -> CftReply {
    match req {
        CftRequest::Peer(peer_req) => {
            let host = peer_ip.to_string();
            let allowed = match claimed_sender(&peer_req) {
                Some(id) => filter.allows_inbound(id, &host),
                None => filter.allows_inbound_from_host(&host),
            };
            if !allowed {
                tracing::debug!(replica = %engine.id(), %peer_ip, "rejecting inbound RPC: partitioned");
                return CftReply::Peer(CftPeerReply::None);
            }
            CftReply::Peer(engine.handle_peer_request(peer_req))
        }
        CftRequest::SubmitCommand { command } => submit_command(engine, command),
        CftRequest::GetState => get_state(engine),
        CftRequest::GetData { key } => get_data(engine, &key),
        CftRequest::SetPartition(spec) => {
            filter.set(spec);
            CftReply::SetPartition { success: true, message: "partition configuration updated".to_string() }
        }
    }
}

fn submit_command(engine: &CftEngine<CftSender>, command: Command) -> CftReply {
    match engine.submit(command) {
        SubmitOutcome::Applied(reply) => CftReply::SubmitCommand {
            success: reply.ok,
            message: reply.message,
            leader_id: Some(engine.id().as_u32()),
        },
        SubmitOutcome::NotLeader { leader_hint } => CftReply::SubmitCommand {
            success: false,
            message: "not leader, contact the current leader".to_string(),
            leader_id: leader_hint.map(ReplicaId::as_u32),
        },
        SubmitOutcome::TimedOut => CftReply::SubmitCommand {
            success: false,
            message: "timed out waiting for commit".to_string(),
            leader_id: Some(engine.id().as_u32()),
        },
    }
}

fn get_state(engine: &CftEngine<CftSender>) -> CftReply {
    let status = engine.status();
    CftReply::GetState {
        state: format!("{:?}", status.role),
        term: status.term.as_u64(),
        node_id: status.node_id.as_u32(),
        log_length: status.log_length.as_u64(),
        commit_index: status.commit_index.as_u64(),
    }
}

fn get_data(engine: &CftEngine<CftSender>, key: &str) -> CftReply {
    match engine.get(key) {
        Some(value) => CftReply::GetData { success: true, value: Some(value), message: "ok".to_string() },
        None => CftReply::GetData { success: false, value: None, message: format!("key '{key}' not found") },
    }
}
