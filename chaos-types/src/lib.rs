//! # chaos-types
//!
//! Wire and data types for the fabric-chaos validation engine.
//!
//! This crate provides the foundational types used across all fabric-chaos crates:
//! - [`Component`], [`Selector`], [`Topology`] - The static cluster model
//! - [`Frame`], [`ContentType`] - Management channel framing
//! - [`ValidationRequest`], [`ValidationResponse`], [`DetailEvent`] - Validation messages
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod component;
mod envelope;
mod error;
mod messages;

pub use component::{
    Component, ComponentKind, Host, LifecycleCommands, Runtime, Selector, Topology,
};
pub use envelope::{ContentType, Frame, FRAME_VERSION, MAX_FRAME_SIZE};
pub use error::WireError;
pub use messages::{
    DetailEvent, EntityDetail, SessionHello, ValidationKind, ValidationRequest,
    ValidationResponse,
};
