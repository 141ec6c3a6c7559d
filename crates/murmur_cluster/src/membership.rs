//! SWIM-style membership over the LWW register.
//!
//! One mutex guards the whole cluster view: the register, the derived
//! peer map, the suspect set, and the Maglev table. The table is
//! rebuilt under that lock on every state change, so a router lookup
//! never observes a peer set and a table from different views.
//!
//! Three background loops run per node:
//! 1. failure detection: direct ping of one random eligible peer;
//! 2. gossip: full state exchange with a small random subgroup;
//! 3. investigation: indirect pings through witnesses for each
//!    suspect; one ack vetoes the suspicion, zero acks confirm death.
//!
//! An RPC failure only ever makes a peer a suspect. Removal happens
//! solely through confirmed investigations, and the removal is itself
//! gossiped, so a dead node disappears everywhere without every node
//! having to notice on its own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use murmur_common::config::MembershipConfig;
use murmur_common::types::now_ms;

use crate::crdt::LwwRegister;
use crate::maglev::Maglev;
use crate::peer::Peer;
use crate::transport::{PeerTransport, WireState};

struct ClusterView {
    state: LwwRegister,
    /// Present peers by name, self excluded.
    peers: HashMap<String, Arc<Peer>>,
    /// Names currently under investigation.
    suspects: HashSet<String>,
    maglev: Maglev,
}

impl ClusterView {
    /// Re-derive the peer map and the Maglev table from the register.
    /// Must be called after every register mutation.
    fn refresh(&mut self, local_name: &str) {
        let present: Vec<Peer> = self
            .state
            .iter_present()
            .filter_map(|element| Peer::from_element(element).ok())
            .collect();
        let mut peers = HashMap::new();
        let mut nodes = Vec::with_capacity(present.len());
        for peer in present {
            nodes.push(peer.name.clone());
            if peer.name != local_name {
                peers.insert(peer.name.clone(), Arc::new(peer));
            }
        }
        self.peers = peers;
        let peers = &self.peers;
        self.suspects.retain(|name| peers.contains_key(name));
        self.maglev = Maglev::new(nodes);
    }
}

pub struct Membership {
    local: Peer,
    config: MembershipConfig,
    transport: Arc<dyn PeerTransport>,
    view: Mutex<ClusterView>,
    suspect_tx: mpsc::UnboundedSender<Arc<Peer>>,
    /// Taken by the investigation loop on start.
    suspect_rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<Peer>>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Membership {
    pub fn new(
        local: Peer,
        config: MembershipConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Arc<Self> {
        let mut state = LwwRegister::new(xxh3_64(local.name.as_bytes()));
        state.add(&local.element());
        let mut view = ClusterView {
            state,
            peers: HashMap::new(),
            suspects: HashSet::new(),
            maglev: Maglev::new(Vec::new()),
        };
        view.refresh(&local.name);

        let (suspect_tx, suspect_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            local,
            config,
            transport,
            view: Mutex::new(view),
            suspect_tx,
            suspect_rx: Mutex::new(Some(suspect_rx)),
            shutdown_tx,
        })
    }

    pub fn local(&self) -> &Peer {
        &self.local
    }

    /// Spawn the three membership loops.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let rx = self
            .suspect_rx
            .lock()
            .take()
            .expect("membership started twice");
        vec![
            tokio::spawn(Arc::clone(self).failure_detection_loop()),
            tokio::spawn(Arc::clone(self).gossip_loop()),
            tokio::spawn(Arc::clone(self).investigation_loop(rx)),
        ]
    }

    /// Signal all loops to finish their current round and exit.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Join an existing cluster through `seed`, retrying with a fixed
    /// backoff until the first sync succeeds or the node shuts down.
    pub async fn bootstrap(&self, seed: &Peer) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let backoff = Duration::from_millis(self.config.bootstrap_backoff_ms);
        loop {
            match self
                .transport
                .state_sync(&seed.addr, self.local_state())
                .await
            {
                Ok(state) => {
                    self.absorb(&state);
                    info!(seed = %seed.name, "joined cluster");
                    return;
                }
                Err(e) => {
                    warn!(seed = %seed.name, error = %e, "bootstrap attempt failed");
                }
            }
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// Serve an incoming state exchange: merge, then answer with the
    /// merged local view.
    pub fn handle_state_sync(&self, incoming: &WireState) -> WireState {
        self.absorb(incoming);
        self.local_state()
    }

    /// Probe `target_addr` on behalf of another node.
    pub async fn handle_ping_req(&self, target_addr: &str) -> bool {
        self.transport.ping(target_addr).await.is_ok()
    }

    pub fn local_state(&self) -> WireState {
        let view = self.view.lock();
        WireState::from_register(&view.state, &self.local.name, &self.local.addr)
    }

    /// Names of all present members, self included, sorted.
    pub fn members(&self) -> Vec<String> {
        let view = self.view.lock();
        let mut names: Vec<String> = view
            .state
            .iter_present()
            .filter_map(|e| Peer::from_element(e).ok())
            .map(|p| p.name)
            .collect();
        names.sort();
        names
    }

    /// The peer owning `table`, or `None` when it is assigned locally.
    pub fn lookup_leaseholder(&self, table: &str) -> Option<Arc<Peer>> {
        let view = self.view.lock();
        let owner = view.maglev.lookup(table.as_bytes())?;
        if owner == self.local.name {
            return None;
        }
        view.peers.get(owner).cloned()
    }

    fn absorb(&self, incoming: &WireState) {
        let mut view = self.view.lock();
        view.state
            .merge(&incoming.add_set_bytes(), &incoming.remove_set_bytes());
        view.refresh(&self.local.name);
        debug!(from = %incoming.peer_name, members = view.peers.len() + 1, "merged state");
    }

    /// Peers that may be probed or gossiped with: present, not under
    /// suspicion, and past their startup grace period.
    fn eligible(&self, view: &ClusterView) -> Vec<Arc<Peer>> {
        let now = now_ms();
        let grace = self.config.startup_grace_period_ms;
        view.peers
            .values()
            .filter(|peer| !view.suspects.contains(&peer.name))
            .filter(|peer| match view.state.add_stamp(&peer.element()) {
                Some(stamp) => now.saturating_sub(stamp.wall) >= grace,
                None => false,
            })
            .cloned()
            .collect()
    }

    fn suspect(&self, peer: Arc<Peer>) {
        let newly = self.view.lock().suspects.insert(peer.name.clone());
        if newly {
            warn!(peer = %peer.name, "suspected");
            let _ = self.suspect_tx.send(peer);
        }
    }

    fn veto(&self, peer: &Peer) {
        if self.view.lock().suspects.remove(&peer.name) {
            info!(peer = %peer.name, "suspicion vetoed");
        }
    }

    async fn confirm_dead(&self, peer: &Peer) {
        {
            let mut view = self.view.lock();
            view.state.remove(&peer.element());
            view.suspects.remove(&peer.name);
            view.refresh(&self.local.name);
        }
        info!(peer = %peer.name, "confirmed dead");
        // Spread the removal right away instead of waiting for the
        // next gossip interval.
        self.gossip_round().await;
    }

    fn jittered(&self, base_ms: u64) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
        Duration::from_millis(base_ms + jitter)
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            let sleep = self.jittered(self.config.failure_detection_interval_ms);
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(sleep) => {}
            }
            let target = {
                let view = self.view.lock();
                self.eligible(&view)
                    .choose(&mut rand::thread_rng())
                    .cloned()
            };
            let Some(target) = target else { continue };
            if let Err(e) = self.transport.ping(&target.addr).await {
                debug!(peer = %target.name, error = %e, "ping failed");
                self.suspect(target);
            }
        }
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            let sleep = self.jittered(self.config.gossip_interval_ms);
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(sleep) => {}
            }
            self.gossip_round().await;
        }
    }

    async fn gossip_round(&self) {
        let targets: Vec<Arc<Peer>> = {
            let view = self.view.lock();
            self.eligible(&view)
                .choose_multiple(&mut rand::thread_rng(), self.config.gossip_subgroup_size)
                .cloned()
                .collect()
        };
        for target in targets {
            match self
                .transport
                .state_sync(&target.addr, self.local_state())
                .await
            {
                Ok(state) => self.absorb(&state),
                Err(e) => {
                    debug!(peer = %target.name, error = %e, "gossip failed");
                    self.suspect(target);
                }
            }
        }
    }

    async fn investigation_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Arc<Peer>>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            let suspect = tokio::select! {
                _ = shutdown.changed() => return,
                suspect = rx.recv() => match suspect {
                    Some(s) => s,
                    None => return,
                },
            };
            self.investigate(&suspect).await;
        }
    }

    /// Ask up to `failure_detection_subgroup_size` witnesses to probe
    /// the suspect indirectly. A single ack clears it; none confirms.
    async fn investigate(&self, suspect: &Peer) {
        let witnesses: Vec<Arc<Peer>> = {
            let view = self.view.lock();
            if !view.suspects.contains(&suspect.name) {
                return;
            }
            self.eligible(&view)
                .iter()
                .filter(|p| p.name != suspect.name)
                .cloned()
                .collect::<Vec<_>>()
                .choose_multiple(
                    &mut rand::thread_rng(),
                    self.config.failure_detection_subgroup_size,
                )
                .cloned()
                .collect()
        };
        for witness in &witnesses {
            match self
                .transport
                .ping_req(&witness.addr, &suspect.name, &suspect.addr)
                .await
            {
                Ok(true) => {
                    self.veto(suspect);
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(witness = %witness.name, error = %e, "ping-req failed");
                }
            }
        }
        self.confirm_dead(suspect).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_common::error::ClusterError;

    use crate::transport::{BatchRequest, BatchResponse};

    struct NullTransport;

    #[async_trait]
    impl PeerTransport for NullTransport {
        async fn ping(&self, _addr: &str) -> Result<(), ClusterError> {
            Err(ClusterError::Transport("unreachable".into()))
        }
        async fn ping_req(
            &self,
            _addr: &str,
            _target_name: &str,
            _target_addr: &str,
        ) -> Result<bool, ClusterError> {
            Err(ClusterError::Transport("unreachable".into()))
        }
        async fn state_sync(
            &self,
            _addr: &str,
            _state: WireState,
        ) -> Result<WireState, ClusterError> {
            Err(ClusterError::Transport("unreachable".into()))
        }
        async fn coordinate(
            &self,
            _addr: &str,
            _batch: BatchRequest,
        ) -> Result<BatchResponse, ClusterError> {
            Err(ClusterError::Transport("unreachable".into()))
        }
    }

    fn config() -> MembershipConfig {
        MembershipConfig {
            startup_grace_period_ms: 0,
            ..MembershipConfig::default()
        }
    }

    fn membership(name: &str) -> Arc<Membership> {
        Membership::new(
            Peer::new(name, format!("127.0.0.1:{name}")),
            config(),
            Arc::new(NullTransport),
        )
    }

    #[test]
    fn test_starts_alone() {
        let m = membership("n1");
        assert_eq!(m.members(), vec!["n1".to_string()]);
        assert!(m.lookup_leaseholder("users").is_none());
    }

    #[test]
    fn test_state_sync_adds_sender() {
        let a = membership("a");
        let b = membership("b");
        let merged = a.handle_state_sync(&b.local_state());
        assert_eq!(a.members(), vec!["a".to_string(), "b".to_string()]);
        // The reply carries the merged view back to the sender.
        b.absorb(&merged);
        assert_eq!(b.members(), a.members());
    }

    #[test]
    fn test_leaseholder_is_consistent_across_nodes() {
        let a = membership("a");
        let b = membership("b");
        let merged = a.handle_state_sync(&b.local_state());
        b.absorb(&merged);

        for table in ["users", "orders", "events", "inventory"] {
            let from_a = a
                .lookup_leaseholder(table)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "a".into());
            let from_b = b
                .lookup_leaseholder(table)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "b".into());
            assert_eq!(from_a, from_b, "table {table}");
        }
    }

    #[test]
    fn test_grace_period_excludes_fresh_peer() {
        let strict = Membership::new(
            Peer::new("a", "127.0.0.1:1"),
            MembershipConfig {
                startup_grace_period_ms: 60_000,
                ..MembershipConfig::default()
            },
            Arc::new(NullTransport),
        );
        let b = membership("b");
        strict.absorb(&b.local_state());
        let view = strict.view.lock();
        assert_eq!(view.peers.len(), 1);
        assert!(strict.eligible(&view).is_empty());
    }

    #[test]
    fn test_suspect_not_eligible() {
        let a = membership("a");
        let b = membership("b");
        a.absorb(&b.local_state());
        {
            let view = a.view.lock();
            assert_eq!(a.eligible(&view).len(), 1);
        }
        a.suspect(Arc::new(b.local().clone()));
        let view = a.view.lock();
        assert!(a.eligible(&view).is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_death_removes_peer() {
        let a = membership("a");
        let b = membership("b");
        a.absorb(&b.local_state());
        a.suspect(Arc::new(b.local().clone()));
        // No witnesses are reachable, so investigation confirms.
        a.investigate(b.local()).await;
        assert_eq!(a.members(), vec!["a".to_string()]);
        assert!(a.lookup_leaseholder("users").is_none());
    }

    #[tokio::test]
    async fn test_removal_survives_merge_with_stale_state() {
        let a = membership("a");
        let b = membership("b");
        a.absorb(&b.local_state());
        a.suspect(Arc::new(b.local().clone()));
        a.investigate(b.local()).await;
        // A stale view that still contains b cannot resurrect it: the
        // remove stamp is newer than the original add.
        a.absorb(&b.local_state());
        assert_eq!(a.members(), vec!["a".to_string()]);
    }
}
