//! Upstream cache client over the newline-delimited JSON RPC substrate.
//!
//! A single connection is shared by all concurrent cache calls of the
//! worker. A connection actor owns the socket write half and a pending
//! table keyed by request id; a per-connection reader task resolves
//! replies as they arrive, so fan-out calls from the scan/value stages
//! multiplex freely. The actor reconnects on demand and fails in-flight
//! calls when the connection drops. Nothing is retried here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value as Json, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use metricast_core::cache::CacheClient;
use metricast_core::config::CacheConfig;
use metricast_core::error::CacheError;
use metricast_core::types::CacheReply;

/// Pending replies keyed by request id.
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<CacheReply, CacheError>>>>>;

/// One queued cache call.
struct Call {
    method: &'static str,
    params: Json,
    reply: oneshot::Sender<Result<CacheReply, CacheError>>,
}

/// RPC-backed implementation of the [`CacheClient`] contract.
///
/// Cloneable handle; all clones share one connection actor.
#[derive(Clone)]
pub struct RpcCacheClient {
    tx: mpsc::Sender<Call>,
    request_timeout: Duration,
}

impl RpcCacheClient {
    /// Spawn the connection actor and return a client handle.
    ///
    /// The connection is established lazily on the first call.
    pub fn new(config: CacheConfig, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        tokio::spawn(connection_actor(config, rx, cancel));
        Self {
            tx,
            request_timeout,
        }
    }

    async fn call(&self, method: &'static str, params: Json) -> Result<CacheReply, CacheError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Call {
                method,
                params,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CacheError::Closed)?;

        match timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CacheError::Closed),
            Err(_) => Err(CacheError::Request(format!(
                "no reply within {}s",
                self.request_timeout.as_secs()
            ))),
        }
    }
}

impl CacheClient for RpcCacheClient {
    async fn get(&self, nodes: &[String], oidmatch: &str) -> Result<CacheReply, CacheError> {
        self.call("get", json!({ "node": nodes, "oidmatch": oidmatch }))
            .await
    }

    async fn get_rate(
        &self,
        nodes: &[String],
        period: u64,
        oidmatch: &str,
    ) -> Result<CacheReply, CacheError> {
        self.call(
            "get_rate",
            json!({ "node": nodes, "period": period, "oidmatch": [oidmatch] }),
        )
        .await
    }
}

/// Connection actor: serializes writes, delegates reads to a reader task.
async fn connection_actor(
    config: CacheConfig,
    mut rx: mpsc::Receiver<Call>,
    cancel: CancellationToken,
) {
    // 연결마다 새 pending 맵을 씁니다. 끊어진 연결의 리더가 종료하며
    // 비우는 맵이 새 연결의 호출을 건드리지 않게 합니다.
    let mut pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let mut writer: Option<OwnedWriteHalf> = None;
    let mut seq: u64 = 0;

    loop {
        let call = tokio::select! {
            maybe_call = rx.recv() => match maybe_call {
                Some(call) => call,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        if writer.is_none() {
            match connect(&config).await {
                Ok((write_half, read_half)) => {
                    pending = Arc::new(Mutex::new(HashMap::new()));
                    tokio::spawn(reader_task(read_half, Arc::clone(&pending), cancel.clone()));
                    writer = Some(write_half);
                }
                Err(e) => {
                    let _ = call.reply.send(Err(e));
                    continue;
                }
            }
        }

        seq += 1;
        let frame = json!({ "id": seq, "method": call.method, "params": call.params });
        let mut line = frame.to_string();
        line.push('\n');

        // 등록을 쓰기 앞에 두어 빠른 응답도 놓치지 않습니다.
        pending.lock().unwrap().insert(seq, call.reply);

        let write_failed = match writer.as_mut() {
            Some(w) => w.write_all(line.as_bytes()).await.is_err(),
            None => true,
        };
        if write_failed {
            warn!(addr = %config.addr, "cache connection lost on write");
            writer = None;
            fail_pending(&pending, || CacheError::Connection("write failed".to_owned()));
        }
    }

    fail_pending(&pending, || CacheError::Closed);
}

/// Establish the TCP connection within the configured timeout.
async fn connect(config: &CacheConfig) -> Result<(OwnedWriteHalf, OwnedReadHalf), CacheError> {
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    let stream = timeout(connect_timeout, TcpStream::connect(&config.addr))
        .await
        .map_err(|_| {
            CacheError::Connection(format!(
                "connect to {} timed out after {}s",
                config.addr, config.connect_timeout_secs
            ))
        })?
        .map_err(|e| CacheError::Connection(format!("connect to {}: {e}", config.addr)))?;
    debug!(addr = %config.addr, "cache connection established");
    let (read_half, write_half) = stream.into_split();
    Ok((write_half, read_half))
}

/// Resolve reply frames until the connection drops.
async fn reader_task(read_half: OwnedReadHalf, pending: PendingMap, cancel: CancellationToken) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = cancel.cancelled() => break,
        };

        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                resolve_reply(&pending, &line);
            }
            Ok(None) => {
                debug!("cache connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(error = %e, "cache connection read error");
                break;
            }
        }
    }

    fail_pending(&pending, || CacheError::Closed);
}

/// Match a reply line to its pending call by id.
fn resolve_reply(pending: &PendingMap, line: &str) {
    let frame: Json = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "malformed cache reply frame");
            return;
        }
    };

    let Some(id) = frame.get("id").and_then(Json::as_u64) else {
        warn!("cache reply frame without id");
        return;
    };
    let Some(reply_tx) = pending.lock().unwrap().remove(&id) else {
        // 타임아웃으로 이미 포기한 호출의 늦은 응답일 수 있습니다.
        debug!(id, "cache reply for unknown call");
        return;
    };

    let result = if let Some(error) = frame.get("error").and_then(Json::as_str) {
        Err(CacheError::Request(error.to_owned()))
    } else {
        match frame.get("result") {
            Some(result) => serde_json::from_value::<CacheReply>(result.clone())
                .map_err(|e| CacheError::Decode(e.to_string())),
            None => Err(CacheError::Decode("reply frame without result".to_owned())),
        }
    };

    let _ = reply_tx.send(result);
}

/// Fail every in-flight call with the given error.
fn fail_pending(pending: &PendingMap, err: impl Fn() -> CacheError) {
    let mut pending = pending.lock().unwrap();
    for (_, reply_tx) in pending.drain() {
        let _ = reply_tx.send(Err(err()));
    }
}
