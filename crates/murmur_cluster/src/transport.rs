//! Peer-to-peer wire contract: the serde types that cross the wire
//! and the transport trait the membership and router layers call.
//!
//! Register elements are raw bytes internally but every element is a
//! `name=host:port` identifier, so the wire form uses UTF-8 strings;
//! the conversion happens here and nowhere else.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use murmur_common::error::ClusterError;
use murmur_common::types::{Timestamp, TxnId};

use crate::crdt::LwwRegister;

/// Full CRDT state of one replica, exchanged during gossip and
/// bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireState {
    pub replica_id: u64,
    pub peer_name: String,
    pub peer_addr: String,
    pub add_set: BTreeMap<String, u64>,
    pub remove_set: BTreeMap<String, u64>,
}

impl WireState {
    pub fn from_register(
        register: &LwwRegister,
        peer_name: &str,
        peer_addr: &str,
    ) -> Self {
        Self {
            replica_id: register.replica_id(),
            peer_name: peer_name.to_string(),
            peer_addr: peer_addr.to_string(),
            add_set: stringify(register.add_set()),
            remove_set: stringify(register.remove_set()),
        }
    }

    pub fn add_set_bytes(&self) -> BTreeMap<Vec<u8>, u64> {
        byteify(&self.add_set)
    }

    pub fn remove_set_bytes(&self) -> BTreeMap<Vec<u8>, u64> {
        byteify(&self.remove_set)
    }
}

fn stringify(set: &BTreeMap<Vec<u8>, u64>) -> BTreeMap<String, u64> {
    set.iter()
        .map(|(k, &v)| (String::from_utf8_lossy(k).into_owned(), v))
        .collect()
}

fn byteify(set: &BTreeMap<String, u64>) -> BTreeMap<Vec<u8>, u64> {
    set.iter().map(|(k, &v)| (k.clone().into_bytes(), v)).collect()
}

/// One client operation inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Op {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

impl Op {
    pub fn key(&self) -> &str {
        match self {
            Op::Put { key, .. } | Op::Get { key } | Op::Delete { key } => key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Committed,
    Aborted,
    Noop,
}

/// Outcome of a coordinated batch, as reported by whichever node
/// actually ran the transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub table: String,
    pub txn_id: TxnId,
    pub read_ts: Timestamp,
    pub commit_ts: Option<Timestamp>,
    pub status: ResponseStatus,
    /// Read results per key; `None` marks a missing or deleted key.
    pub returning: BTreeMap<String, Option<String>>,
}

/// The four peer operations. Implementations live at the server edge;
/// everything in this crate is written against the trait so tests can
/// run whole clusters in one process.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Liveness probe.
    async fn ping(&self, addr: &str) -> Result<(), ClusterError>;

    /// Ask the peer at `addr` to probe `target_addr` on our behalf.
    /// `Ok(true)` means the target answered.
    async fn ping_req(
        &self,
        addr: &str,
        target_name: &str,
        target_addr: &str,
    ) -> Result<bool, ClusterError>;

    /// Exchange full CRDT state; the response is the peer's view after
    /// merging ours.
    async fn state_sync(&self, addr: &str, state: WireState) -> Result<WireState, ClusterError>;

    /// Run a batch on the peer, which must be the leaseholder for the
    /// batch's table.
    async fn coordinate(
        &self,
        addr: &str,
        batch: BatchRequest,
    ) -> Result<BatchResponse, ClusterError>;
}
