//! Whole-cluster tests with an in-process transport: every node is a
//! real `Membership` instance, the wire is a shared routing table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use murmur_common::config::MembershipConfig;
use murmur_common::error::ClusterError;
use murmur_cluster::{
    BatchRequest, BatchResponse, Membership, Peer, PeerTransport, WireState,
};

#[derive(Default)]
struct Hub {
    nodes: Mutex<HashMap<String, Arc<Membership>>>,
    down: Mutex<HashSet<String>>,
}

impl Hub {
    fn register(&self, membership: &Arc<Membership>) {
        self.nodes
            .lock()
            .insert(membership.local().addr.clone(), Arc::clone(membership));
    }

    fn kill(&self, addr: &str) {
        self.down.lock().insert(addr.to_string());
    }

    fn reach(&self, addr: &str) -> Result<Arc<Membership>, ClusterError> {
        if self.down.lock().contains(addr) {
            return Err(ClusterError::Transport(format!("{addr} is down")));
        }
        self.nodes
            .lock()
            .get(addr)
            .cloned()
            .ok_or_else(|| ClusterError::Transport(format!("no route to {addr}")))
    }
}

struct HubTransport {
    hub: Arc<Hub>,
}

#[async_trait]
impl PeerTransport for HubTransport {
    async fn ping(&self, addr: &str) -> Result<(), ClusterError> {
        self.hub.reach(addr).map(|_| ())
    }

    async fn ping_req(
        &self,
        addr: &str,
        _target_name: &str,
        target_addr: &str,
    ) -> Result<bool, ClusterError> {
        let witness = self.hub.reach(addr)?;
        Ok(witness.handle_ping_req(target_addr).await)
    }

    async fn state_sync(&self, addr: &str, state: WireState) -> Result<WireState, ClusterError> {
        Ok(self.hub.reach(addr)?.handle_state_sync(&state))
    }

    async fn coordinate(
        &self,
        _addr: &str,
        _batch: BatchRequest,
    ) -> Result<BatchResponse, ClusterError> {
        Err(ClusterError::Transport("not a data test".into()))
    }
}

fn fast_config() -> MembershipConfig {
    MembershipConfig {
        failure_detection_interval_ms: 10,
        failure_detection_subgroup_size: 2,
        gossip_interval_ms: 10,
        gossip_subgroup_size: 2,
        startup_grace_period_ms: 0,
        bootstrap_backoff_ms: 10,
    }
}

fn spawn_node(hub: &Arc<Hub>, name: &str, port: u16) -> Arc<Membership> {
    let membership = Membership::new(
        Peer::new(name, format!("127.0.0.1:{port}")),
        fast_config(),
        Arc::new(HubTransport {
            hub: Arc::clone(hub),
        }),
    );
    hub.register(&membership);
    membership
}

async fn wait_for<F: Fn() -> bool>(what: &str, deadline: Duration, check: F) {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_two_nodes_converge() {
    let hub = Arc::new(Hub::default());
    let a = spawn_node(&hub, "a", 1);
    let b = spawn_node(&hub, "b", 2);

    let mut tasks = a.start();
    tasks.extend(b.start());
    b.bootstrap(a.local()).await;

    let expected = vec!["a".to_string(), "b".to_string()];
    wait_for("membership convergence", Duration::from_secs(5), || {
        a.members() == expected && b.members() == expected
    })
    .await;

    // Both route every table to the same owner.
    for table in ["users", "orders", "metrics"] {
        let from_a = a
            .lookup_leaseholder(table)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "a".into());
        let from_b = b
            .lookup_leaseholder(table)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "b".into());
        assert_eq!(from_a, from_b);
    }

    a.stop();
    b.stop();
    for task in tasks {
        let _ = task.await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dead_node_is_confirmed_and_removed() {
    let hub = Arc::new(Hub::default());
    let a = spawn_node(&hub, "a", 1);
    let b = spawn_node(&hub, "b", 2);
    let c = spawn_node(&hub, "c", 3);

    let mut tasks = a.start();
    tasks.extend(b.start());
    tasks.extend(c.start());
    b.bootstrap(a.local()).await;
    c.bootstrap(a.local()).await;

    let all = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    wait_for("three-node convergence", Duration::from_secs(5), || {
        a.members() == all && b.members() == all && c.members() == all
    })
    .await;

    c.stop();
    hub.kill(&c.local().addr);

    let survivors = vec!["a".to_string(), "b".to_string()];
    wait_for("dead node removal", Duration::from_secs(10), || {
        a.members() == survivors && b.members() == survivors
    })
    .await;

    // No table routes to the dead node anymore.
    for table in ["users", "orders", "metrics"] {
        for node in [&a, &b] {
            if let Some(owner) = node.lookup_leaseholder(table) {
                assert_ne!(owner.name, "c");
            }
        }
    }

    a.stop();
    b.stop();
    for task in tasks {
        let _ = task.await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_late_joiner_learns_full_view() {
    let hub = Arc::new(Hub::default());
    let a = spawn_node(&hub, "a", 1);
    let b = spawn_node(&hub, "b", 2);

    let mut tasks = a.start();
    tasks.extend(b.start());
    b.bootstrap(a.local()).await;

    let two = vec!["a".to_string(), "b".to_string()];
    wait_for("two-node convergence", Duration::from_secs(5), || {
        a.members() == two && b.members() == two
    })
    .await;

    // c joins through b and must still learn about a.
    let c = spawn_node(&hub, "c", 3);
    tasks.extend(c.start());
    c.bootstrap(b.local()).await;

    let all = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    wait_for("full view at the late joiner", Duration::from_secs(5), || {
        c.members() == all && a.members() == all
    })
    .await;

    a.stop();
    b.stop();
    c.stop();
    for task in tasks {
        let _ = task.await;
    }
}
