//! Mock transport for testing.
//!
//! Allows queueing responses, scripting replies to sent frames, and capturing
//! sent messages for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Frames a responder releases after a send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockReply {
    /// Frames made available to `recv()`, in order.
    pub frames: Vec<Vec<u8>>,
    /// End the connection once these frames have been received.
    pub close: bool,
}

impl MockReply {
    /// No reply.
    pub fn none() -> Self {
        Self::default()
    }

    /// Reply with these frames.
    pub fn frames(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames,
            close: false,
        }
    }

    /// Close the connection after the frames are drained.
    pub fn then_close(mut self) -> Self {
        self.close = true;
        self
    }
}

type Responder = Arc<dyn Fn(&[u8]) -> MockReply + Send + Sync>;

/// Mock transport for testing.
///
/// Without a responder, `recv()` drains the queue and then reports the
/// connection closed. With a responder, `recv()` waits for replies until the
/// responder asks for the connection to close.
#[derive(Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    sent_messages: Vec<Vec<u8>>,
    receive_queue: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    close_when_drained: bool,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a message to be returned by a later `recv()` call.
    pub fn queue_response(&self, data: Vec<u8>) {
        self.lock().receive_queue.push_back(data);
        self.notify.notify_one();
    }

    /// Compute replies for every sent message with `responder`.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> MockReply + Send + Sync + 'static,
    {
        self.lock().responder = Some(Arc::new(responder));
    }

    /// Get all messages that were sent.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.lock().sent_messages.clone()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.lock().fail_next_recv = Some(error.to_string());
        self.notify.notify_one();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            notify: Arc::clone(&self.notify),
        }
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("MockTransport")
            .field("connected", &inner.connected)
            .field("sent", &inner.sent_messages.len())
            .field("queued", &inner.receive_queue.len())
            .field("scripted", &inner.responder.is_some())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let responder = {
            let mut inner = self.lock();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }

            // Check for forced failure
            if let Some(error) = inner.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }

            inner.sent_messages.push(data.to_vec());
            inner.responder.clone()
        };

        if let Some(responder) = responder {
            let reply = responder(data);
            let mut inner = self.lock();
            inner.receive_queue.extend(reply.frames);
            inner.close_when_drained |= reply.close;
            drop(inner);
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        loop {
            {
                let mut inner = self.lock();

                if !inner.connected {
                    return Err(TransportError::NotConnected);
                }

                // Check for forced failure
                if let Some(error) = inner.fail_next_recv.take() {
                    return Err(TransportError::ReceiveFailed(error));
                }

                if let Some(data) = inner.receive_queue.pop_front() {
                    return Ok(data);
                }

                if inner.responder.is_none() || inner.close_when_drained {
                    return Err(TransportError::ConnectionClosed);
                }
            }
            self.notify.notified().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        self.notify.notify_one();
        Ok(())
    }
}
