//! Two real nodes over loopback TCP: peer servers, JSON transport,
//! membership, and request forwarding all in play.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;

use murmur_cluster::{
    BatchRequest, Membership, Op, Peer, PeerTransport, ResponseStatus, Router,
};
use murmur_common::config::{MembershipConfig, StorageConfig};
use murmur_server::peer_server;
use murmur_storage::Store;

struct Node {
    membership: Arc<Membership>,
    router: Arc<Router>,
    shutdown_tx: watch::Sender<bool>,
}

impl Node {
    async fn spawn(name: &str) -> Node {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let store = Arc::new(Store::new(&StorageConfig::default()));
        let transport: Arc<dyn PeerTransport> =
            Arc::new(murmur_server::json_transport::JsonTransport);
        let membership = Membership::new(
            Peer::new(name, addr),
            MembershipConfig {
                failure_detection_interval_ms: 50,
                failure_detection_subgroup_size: 2,
                gossip_interval_ms: 50,
                gossip_subgroup_size: 2,
                startup_grace_period_ms: 0,
                bootstrap_backoff_ms: 50,
            },
            Arc::clone(&transport),
        );
        let router = Arc::new(Router::new(store, Arc::clone(&membership), transport));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(peer_server::run(
            listener,
            Arc::clone(&membership),
            Arc::clone(&router),
            shutdown_rx,
        ));
        membership.start();

        Node {
            membership,
            router,
            shutdown_tx,
        }
    }

    fn stop(&self) {
        self.membership.stop();
        let _ = self.shutdown_tx.send(true);
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

fn get(key: &str) -> BatchRequest {
    BatchRequest {
        ops: vec![Op::Get { key: key.into() }],
    }
}

fn put(key: &str, value: &str) -> BatchRequest {
    BatchRequest {
        ops: vec![Op::Put {
            key: key.into(),
            value: value.into(),
        }],
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_two_nodes_over_tcp() {
    let a = Node::spawn("a").await;
    let b = Node::spawn("b").await;

    b.membership.bootstrap(a.membership.local()).await;

    let expected = vec!["a".to_string(), "b".to_string()];
    wait_for("membership convergence", || {
        a.membership.members() == expected && b.membership.members() == expected
    })
    .await;

    // Writes through either node land on the table's leaseholder and
    // are visible through both.
    let response = a.router.request(put("/users/1", "ada")).await.unwrap();
    assert_eq!(response.status, ResponseStatus::Committed);

    for node in [&a, &b] {
        let response = node.router.request(get("/users/1")).await.unwrap();
        assert_eq!(response.returning["/users/1"], Some("ada".to_string()));
    }

    // Conflict-free second write bumps the same table's history.
    let response = b.router.request(put("/users/1", "grace")).await.unwrap();
    assert_eq!(response.status, ResponseStatus::Committed);
    let response = a.router.request(get("/users/1")).await.unwrap();
    assert_eq!(response.returning["/users/1"], Some("grace".to_string()));

    a.stop();
    b.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tables_spread_across_nodes() {
    let a = Node::spawn("a").await;
    let b = Node::spawn("b").await;
    b.membership.bootstrap(a.membership.local()).await;

    let expected = vec!["a".to_string(), "b".to_string()];
    wait_for("membership convergence", || {
        a.membership.members() == expected && b.membership.members() == expected
    })
    .await;

    // With enough tables both nodes own at least one, and both sides
    // agree on every assignment.
    let tables = [
        "users", "orders", "events", "metrics", "carts", "jobs", "sessions", "emails", "logs",
        "invoices", "tags", "teams",
    ];
    let mut local_to_a = 0;
    for table in tables {
        let from_a = a.membership.lookup_leaseholder(table);
        let from_b = b.membership.lookup_leaseholder(table);
        match (&from_a, &from_b) {
            (None, Some(peer)) => {
                assert_eq!(peer.name, "a");
                local_to_a += 1;
            }
            (Some(peer), None) => assert_eq!(peer.name, "b"),
            _ => panic!("inconsistent assignment for {table}"),
        }
    }
    assert!(local_to_a > 0 && local_to_a < tables.len());

    a.stop();
    b.stop();
}
