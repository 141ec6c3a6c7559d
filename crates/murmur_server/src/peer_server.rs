//! Peer wire server: newline-delimited JSON envelopes over TCP, one
//! request per line, one response per line.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use murmur_cluster::{BatchRequest, BatchResponse, Membership, Router, WireState};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerRequest {
    Ping,
    PingReq {
        target_name: String,
        target_addr: String,
    },
    StateSync {
        state: WireState,
    },
    Coordinate {
        batch: BatchRequest,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerResponse {
    Ack,
    PingAck { ok: bool },
    State { state: WireState },
    Batch { response: BatchResponse },
    Error { message: String },
}

pub async fn run(
    listener: TcpListener,
    membership: Arc<Membership>,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("peer server listening");
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => return,
            accepted = listener.accept() => accepted,
        };
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "peer accept failed");
                continue;
            }
        };
        let membership = Arc::clone(&membership);
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, membership, router).await {
                debug!(%addr, error = %e, "peer connection closed");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    membership: Arc<Membership>,
    router: Arc<Router>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<PeerRequest>(&line) {
            Ok(request) => dispatch(request, &membership, &router).await,
            Err(e) => PeerResponse::Error {
                message: format!("malformed request: {e}"),
            },
        };
        let mut out = serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"encode failed: {e}"}}"#)
        });
        out.push('\n');
        write_half.write_all(out.as_bytes()).await?;
    }
    Ok(())
}

async fn dispatch(
    request: PeerRequest,
    membership: &Arc<Membership>,
    router: &Arc<Router>,
) -> PeerResponse {
    match request {
        PeerRequest::Ping => PeerResponse::Ack,
        PeerRequest::PingReq { target_addr, .. } => PeerResponse::PingAck {
            ok: membership.handle_ping_req(&target_addr).await,
        },
        PeerRequest::StateSync { state } => PeerResponse::State {
            state: membership.handle_state_sync(&state),
        },
        // The sender already decided we are the leaseholder, so run
        // the batch locally instead of routing again.
        PeerRequest::Coordinate { batch } => {
            let result = batch.table().and_then(|t| router.coordinate(&t, &batch));
            match result {
                Ok(response) => PeerResponse::Batch { response },
                Err(e) => PeerResponse::Error {
                    message: e.to_string(),
                },
            }
        }
    }
}
