//! Multiplexing RPC client.
//!
//! One TCP connection carries any number of concurrent calls. A writer task
//! drains an outbound channel and a reader task routes each response to the
//! waiting caller by request id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::codec;
use super::message::{Ack, Call, Data, FrameHeader, Reply, RequestHeader, ResponseHeader};
use crate::error::{Error, Result};
use crate::frame::{DetectionMetadata, FrameMetadata, now_timestamp};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

struct Outbound {
    header: Vec<u8>,
    body: Vec<u8>,
}

/// A successful call: the ack plus what is needed to time it.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub ack: Ack,
    pub sent_bytes: usize,
    pub completed_at: DateTime<Utc>,
}

pub struct RpcClient {
    addr: String,
    outbound: mpsc::Sender<Outbound>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    call_timeout: Duration,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("addr", &self.addr)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl RpcClient {
    /// Dial `addr` and start the connection tasks on the current runtime.
    pub async fn connect(addr: &str, call_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let (outbound, rx) = mpsc::channel(64);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(write_half, rx, closed.clone()));
        tokio::spawn(read_loop(read_half, pending.clone(), closed.clone(), addr.to_string()));

        debug!(addr, "rpc client connected");
        Ok(Self {
            addr: addr.to_string(),
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            call_timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// False once either direction of the connection has failed.
    pub fn is_ready(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub async fn register_source(&self, payload: &str) -> Result<CallOutcome> {
        let call = Call::RegisterSource(Data {
            payload: payload.to_string(),
            sent_timestamp: now_timestamp(),
        });
        self.call(call, Vec::new()).await
    }

    pub async fn submit_frame(&self, metadata: &FrameMetadata, frame: Vec<u8>) -> Result<CallOutcome> {
        let call = Call::SubmitFrame(FrameHeader {
            metadata: serde_json::to_string(metadata)?,
            sent_timestamp: now_timestamp(),
        });
        self.call(call, frame).await
    }

    pub async fn submit_detections(&self, metadata: &DetectionMetadata, frame: Vec<u8>) -> Result<CallOutcome> {
        let call = Call::SubmitDetections(FrameHeader {
            metadata: serde_json::to_string(metadata)?,
            sent_timestamp: now_timestamp(),
        });
        self.call(call, frame).await
    }

    async fn call(&self, call: Call, body: Vec<u8>) -> Result<CallOutcome> {
        if !self.is_ready() {
            return Err(Error::Disconnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let header = serde_json::to_vec(&RequestHeader { id, call })?;
        let sent_bytes = codec::encoded_len(header.len(), body.len());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        // The reader may have cleared the pending map just before the insert.
        if !self.is_ready() {
            self.pending.lock().remove(&id);
            return Err(Error::Disconnected);
        }

        if self.outbound.send(Outbound { header, body }).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::Disconnected);
        }

        let reply = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(Error::Disconnected),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(Error::Timeout(self.call_timeout));
            }
        };
        let completed_at = Utc::now();

        match reply {
            Reply::Ack(ack) => Ok(CallOutcome {
                ack,
                sent_bytes,
                completed_at,
            }),
            Reply::Error { message } => Err(Error::Remote(message)),
        }
    }
}

async fn write_loop(write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Outbound>, closed: Arc<AtomicBool>) {
    let mut writer = BufWriter::new(write_half);
    while let Some(msg) = rx.recv().await {
        if let Err(e) = codec::write_frame(&mut writer, &msg.header, &msg.body).await {
            warn!("rpc write failed: {e}");
            break;
        }
    }
    closed.store(true, Ordering::Release);
    let _ = writer.shutdown().await;
}

async fn read_loop(mut read_half: OwnedReadHalf, pending: Pending, closed: Arc<AtomicBool>, addr: String) {
    loop {
        match codec::read_message::<_, ResponseHeader>(&mut read_half).await {
            Ok(Some((header, _))) => {
                let waiter = pending.lock().remove(&header.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(header.reply);
                    }
                    None => debug!(addr, id = header.id, "reply for unknown or expired call"),
                }
            }
            Ok(None) => {
                debug!(addr, "rpc connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(addr, "rpc read failed: {e}");
                break;
            }
        }
    }
    closed.store(true, Ordering::Release);
    // Dropping the senders wakes every waiting caller with `Disconnected`.
    pending.lock().clear();
}
