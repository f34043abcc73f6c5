//! End-to-end CFT scenarios: real OS threads, loopback TCP, and the actual
//! replica shell boot path — not the loopback `PeerSender` double the engine
//! crate's own unit tests use.

use std::net::TcpListener;
use std::time::{Duration, Instant};

use qkv_config::{ClusterConfig, MemberConfig};
use qkv_replica::{boot_cft, CftReplicaHandle, CftReply, CftRequest};
use qkv_transport::{PeerSender, TcpPeerSender};
use qkv_types::{Command, PeerDescriptor, ReplicaId};

struct Cluster {
    handles: Vec<CftReplicaHandle>,
    members: Vec<MemberConfig>,
    _dirs: Vec<tempfile::TempDir>,
}

impl Cluster {
    fn start(n: u32) -> Self {
        let mut listeners = Vec::new();
        let mut members = Vec::new();
        for id in 1..=n {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            members.push(MemberConfig { id, host: "127.0.0.1".to_string(), port });
            listeners.push(listener);
        }

        let mut handles = Vec::new();
        let mut dirs = Vec::new();
        for (listener, member) in listeners.into_iter().zip(&members) {
            let dir = tempfile::tempdir().unwrap();
            let config = ClusterConfig {
                replica_id: member.id,
                members: members.clone(),
                data_dir: dir.path().to_path_buf(),
                ..ClusterConfig::default()
            };
            handles.push(boot_cft(&config, listener).unwrap());
            dirs.push(dir);
        }

        Self { handles, members, _dirs: dirs }
    }

    fn client_peer(&self, id: u32) -> PeerDescriptor {
        let member = self.members.iter().find(|m| m.id == id).unwrap();
        PeerDescriptor::new(ReplicaId::new(member.id), member.host.clone(), member.port)
    }

    fn request(&self, id: u32, req: CftRequest) -> CftReply {
        TcpPeerSender
            .send(&self.client_peer(id), &req, Duration::from_secs(1))
            .unwrap_or_else(|| panic!("replica {id} did not reply"))
    }

    fn leader(&self) -> Option<u32> {
        for handle in &self.handles {
            if handle.engine.status().role == qkv_cft::Role::Leader {
                return Some(handle.engine.id().as_u32());
            }
        }
        None
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
fn five_replicas_elect_exactly_one_leader() {
    let cluster = Cluster::start(5);

    let elected = poll_until(Duration::from_secs(2), || {
        let leaders = cluster.handles.iter().filter(|h| h.engine.status().role == qkv_cft::Role::Leader).count();
        leaders == 1
    });
    assert!(elected, "expected exactly one leader within 2s");

    let statuses: Vec<_> = cluster.handles.iter().map(|h| h.engine.status()).collect();
    let leaders = statuses.iter().filter(|s| s.role == qkv_cft::Role::Leader).count();
    let followers = statuses.iter().filter(|s| s.role == qkv_cft::Role::Follower).count();
    assert_eq!(leaders, 1);
    assert_eq!(followers, 4);

    let term = statuses[0].term;
    assert!(statuses.iter().all(|s| s.term == term), "all replicas should agree on the term");
}

#[test]
fn submitted_command_propagates_to_every_replica() {
    let cluster = Cluster::start(5);
    poll_until(Duration::from_secs(2), || cluster.leader().is_some());
    let leader = cluster.leader().expect("a leader must emerge");

    let reply = cluster.request(leader, CftRequest::SubmitCommand { command: Command::from_str("SET A=10") });
    match reply {
        CftReply::SubmitCommand { success, .. } => assert!(success, "submit to the leader should succeed"),
        other => panic!("unexpected reply: {other:?}"),
    }

    let propagated = poll_until(Duration::from_secs(2), || {
        cluster.members.iter().all(|m| match cluster.request(m.id, CftRequest::GetData { key: "A".to_string() }) {
            CftReply::GetData { value, .. } => value.as_deref() == Some("10"),
            _ => false,
        })
    });
    assert!(propagated, "SET A=10 should reach every replica within 2s");

    for member in &cluster.members {
        match cluster.request(member.id, CftRequest::GetState) {
            CftReply::GetState { log_length, .. } => assert!(log_length >= 1),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}

#[test]
fn leader_failover_preserves_committed_data() {
    let cluster = Cluster::start(5);
    poll_until(Duration::from_secs(2), || cluster.leader().is_some());
    let old_leader = cluster.leader().expect("a leader must emerge");

    cluster.request(old_leader, CftRequest::SubmitCommand { command: Command::from_str("SET A=10") });
    poll_until(Duration::from_secs(2), || {
        matches!(cluster.request(old_leader, CftRequest::GetData { key: "A".to_string() }), CftReply::GetData { value, .. } if value.as_deref() == Some("10"))
    });

    let old_term = match cluster.request(old_leader, CftRequest::GetState) {
        CftReply::GetState { term, .. } => term,
        other => panic!("unexpected reply: {other:?}"),
    };

    let old_leader_index = cluster.members.iter().position(|m| m.id == old_leader).unwrap();
    let Cluster { mut handles, members, _dirs } = cluster;
    let old_leader_handle = handles.remove(old_leader_index);
    old_leader_handle.stop();
    let cluster = Cluster { handles, members, _dirs };

    let remaining: Vec<u32> = cluster.members.iter().map(|m| m.id).filter(|&id| id != old_leader).collect();
    let new_leader_found = poll_until(Duration::from_secs(3), || {
        remaining.iter().any(|&id| {
            matches!(cluster.request(id, CftRequest::GetState), CftReply::GetState { state, term, .. } if state == "Leader" && term > old_term)
        })
    });
    assert!(new_leader_found, "a new leader with a strictly greater term should emerge within 3s");

    let new_leader = remaining
        .iter()
        .copied()
        .find(|&id| matches!(cluster.request(id, CftRequest::GetState), CftReply::GetState { state, .. } if state == "Leader"))
        .expect("new leader must be found among remaining replicas");

    match cluster.request(new_leader, CftRequest::GetData { key: "A".to_string() }) {
        CftReply::GetData { value, .. } => assert_eq!(value.as_deref(), Some("10")),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[test]
fn multiple_submissions_all_commit_everywhere() {
    let cluster = Cluster::start(5);
    poll_until(Duration::from_secs(2), || cluster.leader().is_some());
    let leader = cluster.leader().expect("a leader must emerge");

    for command in ["SET X=100", "SET Y=200", "SET Z=300"] {
        cluster.request(leader, CftRequest::SubmitCommand { command: Command::from_str(command) });
    }

    let committed = poll_until(Duration::from_secs(2), || {
        cluster.members.iter().all(|m| match cluster.request(m.id, CftRequest::GetState) {
            CftReply::GetState { log_length, .. } => log_length >= 3,
            _ => false,
        })
    });
    assert!(committed, "all three commands should replicate within 2s");

    for member in &cluster.members {
        match cluster.request(member.id, CftRequest::GetData { key: "Y".to_string() }) {
            CftReply::GetData { value, .. } => assert_eq!(value.as_deref(), Some("200")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}

#[test]
fn partition_heals_to_identical_log_length() {
    let cluster = Cluster::start(5);
    poll_until(Duration::from_secs(2), || cluster.leader().is_some());
    let leader = cluster.leader().expect("a leader must emerge");

    // Put the current leader in a 2-member minority; the other 3 form the
    // majority.
    let minority: Vec<u32> = {
        let mut others: Vec<u32> = cluster.members.iter().map(|m| m.id).filter(|&id| id != leader).collect();
        others.truncate(1);
        let mut minority = vec![leader];
        minority.extend(others);
        minority
    };
    let majority: Vec<u32> = cluster.members.iter().map(|m| m.id).filter(|id| !minority.contains(id)).collect();

    for &id in &minority {
        let blocked = majority.iter().map(|&id| ReplicaId::new(id)).collect();
        cluster.request(
            id,
            CftRequest::SetPartition(qkv_partition::PartitionSpec { blocked_node_ids: blocked, blocked_ips: vec![] }),
        );
    }
    for &id in &majority {
        let blocked = minority.iter().map(|&id| ReplicaId::new(id)).collect();
        cluster.request(
            id,
            CftRequest::SetPartition(qkv_partition::PartitionSpec { blocked_node_ids: blocked, blocked_ips: vec![] }),
        );
    }

    let majority_has_leader = poll_until(Duration::from_secs(4), || {
        majority.iter().any(|&id| {
            matches!(cluster.request(id, CftRequest::GetState), CftReply::GetState { state, .. } if state == "Leader")
        })
    });
    assert!(majority_has_leader, "the majority side should elect its own leader within 4s");

    let majority_leader = majority
        .iter()
        .copied()
        .find(|&id| matches!(cluster.request(id, CftRequest::GetState), CftReply::GetState { state, .. } if state == "Leader"))
        .unwrap();
    let reply = cluster.request(majority_leader, CftRequest::SubmitCommand { command: Command::from_str("SET P=1") });
    assert!(matches!(reply, CftReply::SubmitCommand { success: true, .. }));

    for id in cluster.members.iter().map(|m| m.id) {
        cluster.request(
            id,
            CftRequest::SetPartition(qkv_partition::PartitionSpec { blocked_node_ids: vec![], blocked_ips: vec![] }),
        );
    }

    let healed = poll_until(Duration::from_secs(4), || {
        let lengths: Vec<u64> = cluster
            .members
            .iter()
            .map(|m| match cluster.request(m.id, CftRequest::GetState) {
                CftReply::GetState { log_length, .. } => log_length,
                _ => u64::MAX,
            })
            .collect();
        lengths.iter().all(|&l| l == lengths[0])
    });
    assert!(healed, "every replica should converge to an identical log length within 4s of healing");
}
