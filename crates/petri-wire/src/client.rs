//! DEALER-socket client for calling a worker's compute socket.
//!
//! The socket is owned by a background task that multiplexes outbound sends
//! and inbound replies with `tokio::select!`, so the send and receive paths
//! never contend on a lock. Replies are routed to waiting callers by
//! `correlation_id`; streamed replies share one id and end on a `.done` topic.
//!
//! Framing (zeromq-rs 0.4): the DEALER sends and receives raw application
//! frames `[topic, envelope]`. The worker-side ROUTER sees the peer identity
//! as an extra leading frame and must echo it back on replies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, ZmqMessage};

use crate::endpoint::Endpoint;
use crate::envelope::Envelope;
use crate::error::WireError;
use crate::protocol::{
    topics, BigBangRequest, CellChunk, ComputeBatch, ComputeService, ReturnedBatch,
};

/// How long the master is willing to wait for a big-bang stream to finish.
const BIG_BANG_TIMEOUT: Duration = Duration::from_secs(100);

/// A pending reply: one-shot for unary calls, channel for streams.
enum Pending {
    Single(oneshot::Sender<Envelope>),
    Stream(mpsc::Sender<Result<Envelope, WireError>>),
}

/// Client handle for one compute slot on a worker.
pub struct ZmqComputeClient {
    send_tx: mpsc::Sender<ZmqMessage>,
    pending: Arc<Mutex<HashMap<Uuid, Pending>>>,
    _loop_handle: tokio::task::JoinHandle<()>,
}

impl ZmqComputeClient {
    /// Connect a DEALER socket to the worker's ROUTER endpoint.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, WireError> {
        let mut socket = DealerSocket::new();
        let url = endpoint.url();
        info!(endpoint = %url, "connecting to worker");
        socket.connect(&url).await?;

        let pending: Arc<Mutex<HashMap<Uuid, Pending>>> = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel::<ZmqMessage>(64);

        let loop_pending = Arc::clone(&pending);
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, send_rx, loop_pending).await;
        });

        Ok(Self {
            send_tx,
            pending,
            _loop_handle: loop_handle,
        })
    }

    async fn event_loop(
        mut socket: DealerSocket,
        mut send_rx: mpsc::Receiver<ZmqMessage>,
        pending: Arc<Mutex<HashMap<Uuid, Pending>>>,
    ) {
        loop {
            tokio::select! {
                Some(msg) = send_rx.recv() => {
                    if let Err(e) = socket.send(msg).await {
                        warn!(error = %e, "DEALER send failed");
                    }
                }
                result = socket.recv() => {
                    match result {
                        Ok(msg) => Self::route_reply(&pending, msg).await,
                        Err(e) => {
                            debug!(error = %e, "DEALER recv loop ending");
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    /// Hand an inbound reply to whoever is waiting on its correlation id.
    async fn route_reply(pending: &Mutex<HashMap<Uuid, Pending>>, msg: ZmqMessage) {
        let frames: Vec<_> = msg.iter().collect();
        // Depending on the peer's reply framing the DEALER may see a leading
        // empty delimiter frame; skip those.
        let data: Vec<_> = frames.iter().skip_while(|f| f.as_ref().is_empty()).collect();
        if data.len() < 2 {
            warn!(frames = frames.len(), "unexpected frame count on DEALER recv");
            return;
        }

        let envelope = match Envelope::from_bytes(data[1].as_ref()) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to decode reply envelope");
                return;
            }
        };

        let cid = envelope.correlation_id;
        let mut map = pending.lock().await;
        match map.get(&cid) {
            Some(Pending::Single(_)) => {
                if let Some(Pending::Single(tx)) = map.remove(&cid) {
                    let _ = tx.send(envelope);
                }
            }
            Some(Pending::Stream(tx)) => {
                let done = envelope.topic.ends_with(".done");
                let _ = tx.send(Ok(envelope)).await;
                if done {
                    map.remove(&cid);
                }
            }
            None => {
                debug!(correlation_id = %cid, "reply for unknown correlation id");
            }
        }
    }

    async fn enqueue(&self, envelope: &Envelope) -> Result<(), WireError> {
        let bytes = envelope.to_bytes()?;
        let mut msg = ZmqMessage::from(envelope.topic.as_str());
        msg.push_back(bytes.into());
        self.send_tx
            .send(msg)
            .await
            .map_err(|_| WireError::Transport("client event loop closed".into()))
    }

    /// Unary request: send, then wait for the correlated reply.
    ///
    /// The typed [`ComputeService`] methods are built on this; it is public
    /// for the registration exchange, which uses the same fabric.
    pub async fn request(&self, envelope: Envelope, timeout: Duration) -> Result<Envelope, WireError> {
        let cid = envelope.correlation_id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(cid, Pending::Single(tx));

        self.enqueue(&envelope).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&cid);
                Err(WireError::Transport("reply channel closed unexpectedly".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&cid);
                Err(WireError::Timeout(timeout))
            }
        }
    }

    /// Streaming request: replies sharing the correlation id are forwarded
    /// until one arrives with a `.done` topic.
    pub async fn request_stream(
        &self,
        envelope: Envelope,
    ) -> Result<mpsc::Receiver<Result<Envelope, WireError>>, WireError> {
        let cid = envelope.correlation_id;
        let (tx, rx) = mpsc::channel(64);
        self.pending.lock().await.insert(cid, Pending::Stream(tx));

        self.enqueue(&envelope).await?;
        debug!(correlation_id = %cid, topic = %envelope.topic, "sent streaming request");
        Ok(rx)
    }
}

#[async_trait]
impl ComputeService for ZmqComputeClient {
    async fn compute(
        &self,
        batch: ComputeBatch,
        timeout: Duration,
    ) -> Result<ReturnedBatch, WireError> {
        let envelope = Envelope::encode(topics::COMPUTE, &batch)?;
        let reply = self.request(envelope, timeout).await?;
        reply.decode()
    }

    /// Collect big-bang chunks into a typed stream. The receiver yields cell
    /// chunks and closes after the `.done` frame; the overall exchange is
    /// bounded by [`BIG_BANG_TIMEOUT`] on the consuming side.
    async fn big_bang(
        &self,
        request: BigBangRequest,
    ) -> Result<mpsc::Receiver<Result<CellChunk, WireError>>, WireError> {
        let envelope = Envelope::encode(topics::BIG_BANG, &request)?;
        let mut raw = self.request_stream(envelope).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + BIG_BANG_TIMEOUT;
            loop {
                let next = tokio::time::timeout_at(deadline, raw.recv()).await;
                match next {
                    Ok(Some(Ok(envelope))) => {
                        if envelope.topic.ends_with(".done") {
                            break;
                        }
                        match envelope.decode::<CellChunk>() {
                            Ok(chunk) => {
                                if tx.send(Ok(chunk)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                break;
                            }
                        }
                    }
                    Ok(Some(Err(e))) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        let _ = tx.send(Err(WireError::Timeout(BIG_BANG_TIMEOUT))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}
