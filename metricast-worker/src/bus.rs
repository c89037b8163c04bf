//! RPC front-end: newline-delimited JSON over TCP.
//!
//! Each line is a request frame `{"id": …, "method": …, "params": {…}}`
//! answered by `{"id": …, "result": …}` or `{"id": …, "error": …}`.
//! Connection handlers only parse frames and enqueue them; a fixed pool
//! of worker tasks consumes the queue one request at a time, which is
//! the worker-level backpressure: no worker ever has two requests in
//! flight.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use metricast_core::cache::CacheClient;
use metricast_core::config::BusConfig;
use metricast_core::error::{MetricastError, RpcError};

use crate::worker::MethodRegistry;

/// Pending request queue depth.
const QUEUE_CAPACITY: usize = 64;

/// One inbound request frame.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// Caller-chosen correlation id, echoed back verbatim.
    #[serde(default)]
    pub id: Json,
    /// Method name (composite id or `ping`).
    pub method: String,
    /// Named parameters.
    #[serde(default)]
    pub params: Map<String, Json>,
}

/// One outbound response frame.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// Correlation id from the request.
    pub id: Json,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Json>,
    /// Error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    fn ok(id: Json, result: Json) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Json, error: impl ToString) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// A queued request with its reply slot.
struct QueuedRequest {
    frame: RpcRequest,
    reply: oneshot::Sender<RpcResponse>,
}

/// Serve the bus until cancelled.
///
/// Binds the listener, spawns the worker pool, and accepts connections.
/// Returns once the cancellation token fires or the listener dies.
pub async fn serve<C: CacheClient>(
    config: BusConfig,
    registry: Arc<MethodRegistry<C>>,
    cancel: CancellationToken,
) -> Result<(), MetricastError> {
    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|e| {
        MetricastError::Rpc(RpcError::Frame {
            reason: format!("failed to bind {}: {e}", config.bind_addr),
        })
    })?;
    serve_on(listener, config, registry, cancel).await
}

/// Serve on an already-bound listener. Split out for tests that need
/// an ephemeral port.
pub async fn serve_on<C: CacheClient>(
    listener: TcpListener,
    config: BusConfig,
    registry: Arc<MethodRegistry<C>>,
    cancel: CancellationToken,
) -> Result<(), MetricastError> {
    info!(addr = %config.bind_addr, workers = config.workers, "bus listening");

    let (queue_tx, queue_rx) = mpsc::channel::<QueuedRequest>(QUEUE_CAPACITY);
    let queue_rx = Arc::new(Mutex::new(queue_rx));

    let mut workers = Vec::with_capacity(config.workers);
    for worker_id in 0..config.workers {
        let registry = Arc::clone(&registry);
        let queue_rx = Arc::clone(&queue_rx);
        workers.push(tokio::spawn(worker_loop(worker_id, registry, queue_rx)));
    }

    let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                };

                let permit = match Arc::clone(&connection_semaphore).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(peer = %peer, "max connections reached, rejecting");
                        continue;
                    }
                };

                debug!(peer = %peer, "connection accepted");
                let queue_tx = queue_tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, queue_tx, cancel).await {
                        debug!(peer = %peer, error = %e, "connection closed with error");
                    }
                    drop(permit);
                });
            }
            _ = cancel.cancelled() => {
                info!("bus shutting down");
                break;
            }
        }
    }

    // 큐 송신측을 닫아 워커들이 잔여 요청을 비우고 끝나게 합니다.
    drop(queue_tx);
    for worker in workers {
        let _ = worker.await;
    }

    Ok(())
}

/// Consume queued requests one at a time.
async fn worker_loop<C: CacheClient>(
    worker_id: usize,
    registry: Arc<MethodRegistry<C>>,
    queue_rx: Arc<Mutex<mpsc::Receiver<QueuedRequest>>>,
) {
    loop {
        let queued = {
            let mut rx = queue_rx.lock().await;
            rx.recv().await
        };
        let Some(QueuedRequest { frame, reply }) = queued else {
            debug!(worker_id, "queue closed, worker exiting");
            break;
        };

        debug!(worker_id, method = %frame.method, "request picked up");
        let response = match registry.dispatch(&frame.method, &frame.params).await {
            Ok(result) => RpcResponse::ok(frame.id, result),
            Err(e) => RpcResponse::err(frame.id, e),
        };
        let _ = reply.send(response);
    }
}

/// Read frames off one connection and answer them in order.
async fn handle_connection(
    stream: TcpStream,
    queue_tx: mpsc::Sender<QueuedRequest>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = cancel.cancelled() => break,
        };
        let Some(line) = line else { break }; // EOF
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(frame) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let queued = QueuedRequest {
                    frame,
                    reply: reply_tx,
                };
                if queue_tx.send(queued).await.is_err() {
                    break; // 서버 종료 중
                }
                match reply_rx.await {
                    Ok(response) => response,
                    Err(_) => break,
                }
            }
            Err(e) => RpcResponse::err(
                Json::Null,
                RpcError::Frame {
                    reason: e.to_string(),
                },
            ),
        };

        let mut out = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        out.push('\n');
        write_half.write_all(out.as_bytes()).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_parses_with_defaults() {
        let frame: RpcRequest = serde_json::from_str(r#"{"method": "ping"}"#).unwrap();
        assert_eq!(frame.method, "ping");
        assert!(frame.id.is_null());
        assert!(frame.params.is_empty());
    }

    #[test]
    fn response_omits_absent_fields() {
        let ok = RpcResponse::ok(serde_json::json!(7), serde_json::json!({"a": 1}));
        let text = serde_json::to_string(&ok).unwrap();
        assert!(text.contains("\"result\""));
        assert!(!text.contains("\"error\""));

        let err = RpcResponse::err(serde_json::json!(8), "boom");
        let text = serde_json::to_string(&err).unwrap();
        assert!(text.contains("\"error\":\"boom\""));
        assert!(!text.contains("\"result\""));
    }
}
