//! # fabric-chaos-harness
//!
//! Chaos orchestration for distributed control-plane clusters.
//!
//! This crate disturbs a running cluster and checks that it heals:
//! - Fault injection: restart or stop randomly selected controllers, routers
//!   and hosted apps under per-category concurrency limits
//! - Entity churn: delete, modify and recreate services, identities and policies
//!   through the edge management API
//! - Convergence validation: poll every controller until it reports a
//!   consistent view of the cluster, bounded by a shared deadline
//!
//! ## Architecture
//!
//! ```text
//! ChaosHarness ──────────── builds everything below from chaos.toml
//! ChaosOrchestrator
//!   ├── ScenarioRotation ── which categories to disturb
//!   ├── TaskScheduler ───── bounded-concurrency retrying task runner
//!   │     └── ComponentControl ── ssh / docker lifecycle drivers
//!   ├── EntityChurn ─────── edge API create/modify/delete
//!   ├── UpChecker ───────── process + router online checks
//!   └── ClusterValidator
//!         └── ConvergencePoller (one per controller)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod churn;
pub mod cluster;
pub mod config;
pub mod convergence;
pub mod edge;
pub mod error;
pub mod harness;
pub mod lifecycle;
pub mod orchestrator;
pub mod scheduler;
pub mod ssh;
pub mod up;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

pub use churn::{ChurnConfig, ChurnError, EntityChurn};
pub use cluster::ClusterValidator;
pub use config::{AuthConfig, ChaosConfig, Config, ConfigError, FaultAction, FaultConfig, TimingConfig};
pub use convergence::{Convergence, ConvergenceError, ConvergencePoller, ValidationProbe};
pub use edge::{EdgeProvider, SessionEdgeProvider};
pub use error::ChaosError;
pub use harness::ChaosHarness;
pub use lifecycle::{ComponentControl, DefaultControl, Restartable};
pub use orchestrator::{ChaosOrchestrator, IterationReport};
pub use scheduler::{ExecutionSummary, FailurePolicy, LabeledTask, SchedulerError, TaskScheduler};
pub use up::{IdCache, UpChecker};
