//! Management channel multiplexer.
//!
//! A [`MgmtChannel`] owns one transport and one reader task. The reader
//! decodes every incoming [`Frame`] and routes it:
//!
//! ```text
//! transport.recv() → Frame ─┬─ reply_for = Some(seq) → waiting send_for_reply()
//!                           ├─ bound content type    → bind() receiver
//!                           └─ anything else         → dropped (debug log)
//! ```
//!
//! When the transport ends the reader fires the channel's close token and
//! drops every handler, so receivers observe the close after draining what
//! was already delivered.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chaos_types::{ContentType, Frame, SessionHello, WireError};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::ApiSession;
use crate::transport::{TcpTransport, Transport, TransportError};

/// Frames buffered per bound content type before the reader waits.
pub const HANDLER_BUFFER: usize = 256;

/// Channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame could not be encoded or decoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// No reply within the send timeout.
    #[error("timed out after {after:?} waiting for reply to {what}")]
    Timeout {
        /// Configured timeout.
        after: Duration,
        /// Content type of the request.
        what: &'static str,
    },

    /// Channel closed while a reply was outstanding.
    #[error("channel closed")]
    Closed,
}

type PendingReplies = DashMap<u32, oneshot::Sender<Frame>>;
type Handlers = DashMap<i32, mpsc::Sender<Frame>>;

/// A persistent, multiplexed channel to one controller.
pub struct MgmtChannel {
    peer: String,
    transport: Arc<dyn Transport>,
    pending: Arc<PendingReplies>,
    handlers: Arc<Handlers>,
    closed: CancellationToken,
    next_sequence: AtomicU32,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for MgmtChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MgmtChannel")
            .field("peer", &self.peer)
            .field("closed", &self.closed.is_cancelled())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl MgmtChannel {
    /// Connect `transport` to `address` and start the reader task.
    pub async fn open(transport: Arc<dyn Transport>, address: &str) -> Result<Self, ChannelError> {
        transport.connect(address).await?;

        let pending: Arc<PendingReplies> = Arc::new(DashMap::new());
        let handlers: Arc<Handlers> = Arc::new(DashMap::new());
        let closed = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            address.to_string(),
            Arc::clone(&transport),
            Arc::clone(&pending),
            Arc::clone(&handlers),
            closed.clone(),
        ));

        Ok(Self {
            peer: address.to_string(),
            transport,
            pending,
            handlers,
            closed,
            next_sequence: AtomicU32::new(1),
            reader,
        })
    }

    /// Present the session token. Must be the first frame on the channel.
    pub async fn hello(&self, token: &str) -> Result<(), ChannelError> {
        let hello = SessionHello {
            token: token.to_string(),
        };
        self.send(Frame::new(ContentType::SessionHello, hello.to_bytes()?))
            .await
            .map(|_| ())
    }

    /// Route frames of `content_type` that are not replies to the returned
    /// receiver. Replaces any earlier binding.
    pub fn bind(&self, content_type: ContentType) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(HANDLER_BUFFER);
        self.handlers.insert(content_type as i32, tx);
        rx
    }

    /// Token cancelled when the channel closes for any reason.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// True once the channel has closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Remote address.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send a frame without waiting for a reply. Returns its sequence.
    pub async fn send(&self, frame: Frame) -> Result<u32, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let bytes = frame.with_sequence(sequence).to_bytes()?;
        self.transport.send(&bytes).await?;
        Ok(sequence)
    }

    /// Send a request and wait up to `timeout` for the correlated reply.
    pub async fn send_for_reply(&self, frame: Frame, timeout: Duration) -> Result<Frame, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let what = frame.kind().map(|k| k.name()).unwrap_or("unknown");
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let bytes = frame.with_sequence(sequence).to_bytes()?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(sequence, tx);

        let exchange = async {
            self.transport.send(&bytes).await?;
            rx.await.map_err(|_| ChannelError::Closed)
        };

        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout { after: timeout, what }),
        };
        if result.is_err() {
            self.pending.remove(&sequence);
        }
        result
    }

    /// Close the channel and stop the reader.
    pub async fn close(&self) {
        self.closed.cancel();
        if let Err(e) = self.transport.close().await {
            tracing::debug!(peer = %self.peer, error = %e, "error closing management transport");
        }
        self.reader.abort();
    }
}

impl Drop for MgmtChannel {
    fn drop(&mut self) {
        self.closed.cancel();
        self.reader.abort();
    }
}

async fn read_loop(
    peer: String,
    transport: Arc<dyn Transport>,
    pending: Arc<PendingReplies>,
    handlers: Arc<Handlers>,
    closed: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = closed.cancelled() => break,
            received = transport.recv() => received,
        };

        let bytes = match received {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "management channel ended");
                break;
            }
        };

        let frame = match Frame::from_bytes(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "dropping undecodable frame");
                continue;
            }
        };

        if let Some(sequence) = frame.reply_for {
            if let Some((_, waiter)) = pending.remove(&sequence) {
                // Waiter may have timed out already
                let _ = waiter.send(frame);
                continue;
            }
        }

        // Clone the sender out so no map guard is held across the await
        let handler = handlers.get(&frame.content_type).map(|h| h.value().clone());
        match handler {
            Some(tx) => {
                let content_type = frame.content_type;
                if tx.send(frame).await.is_err() {
                    handlers.remove(&content_type);
                }
            }
            None => {
                tracing::debug!(
                    peer = %peer,
                    content_type = frame.content_type,
                    "no handler bound, dropping frame"
                );
            }
        }
    }

    closed.cancel();
    pending.clear();
    handlers.clear();
}

/// Opens authenticated management channels.
#[async_trait]
pub trait ChannelDialer: Send + Sync {
    /// Open a channel to the session's controller and present its token.
    async fn dial(&self, session: &ApiSession) -> Result<MgmtChannel, ChannelError>;
}

/// Dials controllers over length-prefixed TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    /// Dialer with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ChannelDialer for TcpDialer {
    async fn dial(&self, session: &ApiSession) -> Result<MgmtChannel, ChannelError> {
        let transport = Arc::new(TcpTransport::with_connect_timeout(self.connect_timeout));
        let channel = MgmtChannel::open(transport, &session.mgmt_address).await?;
        channel.hello(&session.token).await?;
        Ok(channel)
    }
}
