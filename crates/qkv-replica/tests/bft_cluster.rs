//! End-to-end BFT scenario: real OS threads, loopback TCP,
//! and the actual replica shell boot path, mirroring `tests/cft_cluster.rs`.

use std::net::TcpListener;
use std::time::{Duration, Instant};

use qkv_bft::{ClientRequest, PeerRequest as BftPeerRequest, RequestMessage};
use qkv_config::{ClusterConfig, EngineKind, MemberConfig};
use qkv_replica::{boot_bft, BftReplicaHandle, BftReply, BftRequest};
use qkv_transport::{PeerSender, TcpPeerSender};
use qkv_types::{Command, PeerDescriptor, ReplicaId};

struct Cluster {
    handles: Vec<BftReplicaHandle>,
    members: Vec<MemberConfig>,
}

impl Cluster {
    fn start(n: u32, malicious_id: Option<u32>) -> Self {
        let mut listeners = Vec::new();
        let mut members = Vec::new();
        for id in 1..=n {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            members.push(MemberConfig { id, host: "127.0.0.1".to_string(), port });
            listeners.push(listener);
        }

        let mut handles = Vec::new();
        for (listener, member) in listeners.into_iter().zip(&members) {
            let config = ClusterConfig {
                engine: EngineKind::Bft,
                replica_id: member.id,
                members: members.clone(),
                malicious: malicious_id == Some(member.id),
                ..ClusterConfig::default()
            };
            handles.push(boot_bft(&config, listener).unwrap());
        }

        Self { handles, members }
    }

    fn client_peer(&self, id: u32) -> PeerDescriptor {
        let member = self.members.iter().find(|m| m.id == id).unwrap();
        PeerDescriptor::new(ReplicaId::new(member.id), member.host.clone(), member.port)
    }

    fn request(&self, id: u32, req: BftRequest) -> BftReply {
        TcpPeerSender
            .send(&self.client_peer(id), &req, Duration::from_secs(8))
            .unwrap_or_else(|| panic!("replica {id} did not reply"))
    }

    fn primary(&self) -> u32 {
        self.handles[0].engine.status().primary_id.as_u32()
    }

    fn submit(&self, primary: u32, command: &str, client_id: u64) -> BftReply {
        self.request(
            primary,
            BftRequest::Peer(BftPeerRequest::Request(RequestMessage {
                request: ClientRequest { operation: Command::from_str(command), timestamp: client_id, client_id },
            })),
        )
    }
}

fn poll_until<F: FnMut() -> bool>(timeout: Duration, mut predicate: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn four_replicas_with_one_malicious_still_execute_requests() {
    // N = 3f+1 = 4, f = 1: one malicious replica must not block progress.
    let cluster = Cluster::start(4, Some(4));
    let primary = cluster.primary();

    let mut successes = 0;
    for (i, command) in ["SET A=1", "SET B=2", "SET C=3"].iter().enumerate() {
        let reply = cluster.submit(primary, command, i as u64 + 1);
        if let BftReply::Peer(qkv_bft::PeerReply::Request(r)) = reply {
            if r.success {
                successes += 1;
            }
        }
    }

    assert!(successes >= 2, "expected at least two of three requests to execute despite one malicious replica");
}

#[test]
fn four_honest_replicas_commit_a_single_submit() {
    let cluster = Cluster::start(4, None);
    let primary = cluster.primary();

    let reply = cluster.submit(primary, "SET X=100", 1);
    match reply {
        BftReply::Peer(qkv_bft::PeerReply::Request(r)) => assert!(r.success, "submit to an all-honest cluster should succeed"),
        other => panic!("unexpected reply: {other:?}"),
    }

    let converged = poll_until(Duration::from_secs(8), || {
        cluster.members.iter().all(|m| {
            matches!(
                cluster.request(m.id, BftRequest::Peer(BftPeerRequest::GetStatus(qkv_bft::GetStatusRequest))),
                BftReply::Peer(qkv_bft::PeerReply::Status(_))
            )
        })
    });
    assert!(converged, "every replica should still be responsive after the submit");
}
