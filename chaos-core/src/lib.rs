//! # chaos-core
//!
//! Pure logic for fabric-chaos (no I/O, instant tests).
//!
//! This crate holds the decisions of the chaos engine without any network,
//! process or clock access:
//! - [`RetryPolicy`] classifies task failures into [`RetryDecision`]s
//! - [`SelectionStrategy`] and [`select_random`] pick fault victims
//! - [`ScenarioRotation`] decides which categories each iteration disturbs
//!
//! The actual I/O (restarting components, talking to controllers) is
//! performed by `chaos-harness` and `chaos-client`, which consult these
//! functions. Randomised functions take the caller's `Rng`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod retry;
pub mod scenario;
pub mod selection;

pub use error::{ApiErrorCode, TaskError};
pub use retry::{RetryDecision, RetryPolicy, CREATE_PREFIX, DEFAULT_MAX_ATTEMPTS, DELETE_PREFIX};
pub use scenario::{Category, Scenario, ScenarioRotation};
pub use selection::{select_components, select_random, SelectionError, SelectionStrategy};
