//! Transport abstraction for management channels.
//!
//! This module provides a pluggable byte transport that abstracts the
//! underlying connection mechanism (length-prefixed TCP, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection
//! - `send()` transmits one encoded frame
//! - `recv()` receives one encoded frame
//! - `close()` gracefully terminates
//!
//! `send()` and `recv()` may be called concurrently from different tasks:
//! the channel multiplexer keeps one reader task blocked in `recv()` while
//! requests are sent.
//!
//! # Example
//!
//! ```ignore
//! let transport = TcpTransport::new();
//! transport.connect("10.0.0.1:6262").await?;
//! transport.send(&frame.to_bytes()?).await?;
//! let reply = transport.recv().await?;
//! ```

mod mock;
mod tcp;

pub use mock::{MockReply, MockTransport};
pub use tcp::TcpTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Frame length prefix above the limit.
    #[error("frame too large: {size} > {max}")]
    FrameTooLarge {
        /// Announced size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for sending and receiving management frames.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a controller management address (`host:port`).
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one encoded frame.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive one encoded frame.
    ///
    /// Blocks until data is available or the connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
