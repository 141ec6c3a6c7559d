//! Line-protocol client server.
//!
//! One task per connection, capped by a semaphore. Statements arrive
//! `;`-terminated; replies are newline-terminated text. A `BEGIN`
//! opens a batch that is queued client-side in the session and shipped
//! as one transaction at `END`.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use murmur_cluster::{BatchRequest, BatchResponse, Op, ResponseStatus, Router};
use murmur_common::error::MurmurError;

use crate::statement::{parse, Statement};

pub async fn run(
    listener: TcpListener,
    router: Arc<Router>,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(max_connections));
    info!(max_connections, "client server listening");
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => return,
            accepted = listener.accept() => accepted,
        };
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            return;
        };
        debug!(%addr, "client connected");
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, router).await {
                debug!(%addr, error = %e, "connection closed");
            }
            drop(permit);
        });
    }
}

async fn handle_connection(mut stream: TcpStream, router: Arc<Router>) -> std::io::Result<()> {
    let mut session = Session::new(router);
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);
        while let Some(end) = buffer.iter().position(|&b| b == b';') {
            let statement: Vec<u8> = buffer.drain(..=end).collect();
            let text = String::from_utf8_lossy(&statement[..statement.len() - 1]).into_owned();
            if text.trim().is_empty() {
                continue;
            }
            match session.execute(&text).await {
                Reply::Text(reply) => {
                    stream.write_all(reply.as_bytes()).await?;
                    stream.write_all(b"\n").await?;
                }
                Reply::Exit => {
                    stream.write_all(b"BYE\n").await?;
                    return Ok(());
                }
            }
        }
    }
}

pub enum Reply {
    Text(String),
    Exit,
}

/// Per-connection state: the router handle and the batch opened by a
/// `BEGIN`, if any.
pub struct Session {
    router: Arc<Router>,
    pending: Option<Vec<Op>>,
}

impl Session {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            pending: None,
        }
    }

    pub async fn execute(&mut self, input: &str) -> Reply {
        let statement = match parse(input) {
            Ok(s) => s,
            Err(e) => return Reply::Text(format!("SYNTAX ERR: {e}")),
        };
        match statement {
            Statement::Exit => Reply::Exit,
            Statement::Begin => match self.pending {
                Some(_) => Reply::Text("ERR: transaction already open".into()),
                None => {
                    self.pending = Some(Vec::new());
                    Reply::Text("OK".into())
                }
            },
            Statement::End => match self.pending.take() {
                None => Reply::Text("ERR: no open transaction".into()),
                Some(ops) => self.dispatch(ops).await,
            },
            Statement::Put { key, value } => self.op(Op::Put { key, value }).await,
            Statement::Get { key } => self.op(Op::Get { key }).await,
            Statement::Delete { key } => self.op(Op::Delete { key }).await,
        }
    }

    async fn op(&mut self, op: Op) -> Reply {
        match &mut self.pending {
            Some(ops) => {
                ops.push(op);
                Reply::Text("QUEUED".into())
            }
            None => self.dispatch(vec![op]).await,
        }
    }

    async fn dispatch(&mut self, ops: Vec<Op>) -> Reply {
        match self.router.request(BatchRequest { ops }).await {
            Ok(response) => Reply::Text(format_response(&response)),
            Err(e) => Reply::Text(format_error(&e)),
        }
    }
}

fn format_error(e: &MurmurError) -> String {
    format!("ERR: {e}")
}

/// Read results first, one line per key in key order, then the
/// outcome line.
fn format_response(response: &BatchResponse) -> String {
    let mut lines = Vec::with_capacity(response.returning.len() + 1);
    for (key, value) in &response.returning {
        match value {
            Some(v) => lines.push(format!("{key} = {v}")),
            None => lines.push(format!("{key} = NULL")),
        }
    }
    lines.push(match response.status {
        ResponseStatus::Committed => match response.commit_ts {
            Some(ts) => format!("COMMITTED {ts}"),
            None => "COMMITTED".into(),
        },
        ResponseStatus::Aborted => "ABORTED".into(),
        ResponseStatus::Noop => "OK".into(),
    });
    lines.join("\n")
}
