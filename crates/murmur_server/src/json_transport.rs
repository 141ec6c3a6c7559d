//! Outbound peer transport: one TCP connection per call, one JSON
//! line each way. Cheap enough at membership rates and keeps failure
//! handling trivial, a broken peer fails the call and the caller's
//! suspicion machinery takes it from there.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use murmur_cluster::{BatchRequest, BatchResponse, PeerTransport, WireState};
use murmur_common::error::ClusterError;

use crate::peer_server::{PeerRequest, PeerResponse};

pub struct JsonTransport;

impl JsonTransport {
    async fn call(&self, addr: &str, request: PeerRequest) -> Result<PeerResponse, ClusterError> {
        let transport_err = |e: std::io::Error| ClusterError::Transport(format!("{addr}: {e}"));
        let mut stream = TcpStream::connect(addr).await.map_err(transport_err)?;

        let mut line = serde_json::to_string(&request)
            .map_err(|e| ClusterError::Transport(format!("encode: {e}")))?;
        line.push('\n');
        stream.write_all(line.as_bytes()).await.map_err(transport_err)?;

        let mut response = String::new();
        let mut reader = BufReader::new(stream);
        reader
            .read_line(&mut response)
            .await
            .map_err(transport_err)?;
        if response.is_empty() {
            return Err(ClusterError::Transport(format!("{addr}: connection closed")));
        }
        match serde_json::from_str(&response)
            .map_err(|e| ClusterError::Transport(format!("decode: {e}")))?
        {
            PeerResponse::Error { message } => Err(ClusterError::Transport(message)),
            response => Ok(response),
        }
    }
}

#[async_trait]
impl PeerTransport for JsonTransport {
    async fn ping(&self, addr: &str) -> Result<(), ClusterError> {
        match self.call(addr, PeerRequest::Ping).await? {
            PeerResponse::Ack => Ok(()),
            other => Err(unexpected(addr, &other)),
        }
    }

    async fn ping_req(
        &self,
        addr: &str,
        target_name: &str,
        target_addr: &str,
    ) -> Result<bool, ClusterError> {
        let request = PeerRequest::PingReq {
            target_name: target_name.to_string(),
            target_addr: target_addr.to_string(),
        };
        match self.call(addr, request).await? {
            PeerResponse::PingAck { ok } => Ok(ok),
            other => Err(unexpected(addr, &other)),
        }
    }

    async fn state_sync(&self, addr: &str, state: WireState) -> Result<WireState, ClusterError> {
        match self.call(addr, PeerRequest::StateSync { state }).await? {
            PeerResponse::State { state } => Ok(state),
            other => Err(unexpected(addr, &other)),
        }
    }

    async fn coordinate(
        &self,
        addr: &str,
        batch: BatchRequest,
    ) -> Result<BatchResponse, ClusterError> {
        match self.call(addr, PeerRequest::Coordinate { batch }).await? {
            PeerResponse::Batch { response } => Ok(response),
            other => Err(unexpected(addr, &other)),
        }
    }
}

fn unexpected(addr: &str, response: &PeerResponse) -> ClusterError {
    ClusterError::Transport(format!("{addr}: unexpected response {response:?}"))
}
