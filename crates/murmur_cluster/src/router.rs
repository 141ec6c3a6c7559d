//! Request routing: validate a batch, find the table's leaseholder,
//! and either coordinate locally or forward.

use std::sync::Arc;

use tracing::debug;

use murmur_common::error::{MurmurError, MurmurResult, TxnError};
use murmur_storage::{Store, TxnStatus};

use crate::membership::Membership;
use crate::transport::{BatchRequest, BatchResponse, Op, PeerTransport, ResponseStatus};

impl BatchRequest {
    /// The single table this batch addresses. Every key must have the
    /// shape `/table/pkey` with alphanumeric segments, and all keys
    /// must agree on the table.
    pub fn table(&self) -> MurmurResult<String> {
        if self.ops.is_empty() {
            return Err(MurmurError::InvalidRequest("empty batch".into()));
        }
        let mut table: Option<&str> = None;
        for op in &self.ops {
            let (t, _) = parse_key(op.key())?;
            match table {
                None => table = Some(t),
                Some(seen) if seen == t => {}
                Some(seen) => {
                    return Err(MurmurError::InvalidRequest(format!(
                        "batch spans tables {seen} and {t}"
                    )));
                }
            }
        }
        Ok(table.unwrap_or_default().to_string())
    }
}

/// Split `/table/pkey` into its two segments.
fn parse_key(key: &str) -> MurmurResult<(&str, &str)> {
    let malformed = || {
        MurmurError::InvalidRequest(format!(
            "key {key:?} must have the form /table/pkey with alphanumeric segments"
        ))
    };
    let rest = key.strip_prefix('/').ok_or_else(malformed)?;
    let (table, pkey) = rest.split_once('/').ok_or_else(malformed)?;
    let alnum = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
    if !alnum(table) || !alnum(pkey) {
        return Err(malformed());
    }
    Ok((table, pkey))
}

pub struct Router {
    store: Arc<Store>,
    membership: Arc<Membership>,
    transport: Arc<dyn PeerTransport>,
}

impl Router {
    pub fn new(
        store: Arc<Store>,
        membership: Arc<Membership>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            store,
            membership,
            transport,
        }
    }

    /// Execute a batch wherever its table lives. Forwarded responses
    /// are returned verbatim.
    pub async fn request(&self, batch: BatchRequest) -> MurmurResult<BatchResponse> {
        let table = batch.table()?;
        match self.membership.lookup_leaseholder(&table) {
            None => self.coordinate(&table, &batch),
            Some(peer) => {
                debug!(table, peer = %peer.name, "forwarding batch");
                Ok(self.transport.coordinate(&peer.addr, batch).await?)
            }
        }
    }

    /// Run the whole batch inside one transaction. An SSI abort is a
    /// normal outcome reported in the response status, not an error.
    pub fn coordinate(&self, table: &str, batch: &BatchRequest) -> MurmurResult<BatchResponse> {
        let mut txn = self.store.begin();
        for op in &batch.ops {
            match op {
                Op::Get { key } => {
                    txn.read(key.as_bytes())?;
                }
                Op::Put { key, value } => {
                    txn.write(key.as_bytes(), value.clone().into_bytes());
                }
                Op::Delete { key } => {
                    txn.delete(key.as_bytes());
                }
            }
        }
        let status = match txn.commit() {
            Ok(()) => match txn.status() {
                TxnStatus::Noop => ResponseStatus::Noop,
                _ => ResponseStatus::Committed,
            },
            Err(MurmurError::Txn(TxnError::Conflict(_))) => ResponseStatus::Aborted,
            Err(e) => return Err(e),
        };
        let returning = txn
            .returning()
            .iter()
            .map(|(k, v)| {
                (
                    String::from_utf8_lossy(k).into_owned(),
                    v.as_ref()
                        .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
                )
            })
            .collect();
        Ok(BatchResponse {
            table: table.to_string(),
            txn_id: txn.txn_id(),
            read_ts: txn.read_ts(),
            commit_ts: txn.commit_ts(),
            status,
            returning,
        })
    }
}
