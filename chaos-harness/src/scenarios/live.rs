//! Scenarios against a running cluster.
//!
//! Run with `FABRIC_CHAOS_CONFIG=/path/to/chaos.toml cargo test -- --ignored`.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, CONFIG_ENV};
use crate::harness::ChaosHarness;

fn harness() -> ChaosHarness {
    let path = std::env::var(CONFIG_ENV).map(PathBuf::from).unwrap_or_else(|_| Config::default_path());
    let config = Config::from_file(&path).unwrap();
    ChaosHarness::from_config(config).unwrap()
}

/// An undisturbed cluster passes every configured validation.
#[tokio::test]
#[ignore = "requires cluster"]
async fn quiet_cluster_validates_clean() {
    let harness = harness();
    let chaos = harness.orchestrator(None);
    let results = chaos.validate_cluster(&CancellationToken::new()).await.unwrap();
    assert_eq!(results.len(), harness.config().validations.len());
    for kind in &results {
        assert_eq!(kind.controllers.len(), harness.sessions().len());
    }
}

/// Every configured component is running.
#[tokio::test]
#[ignore = "requires cluster"]
async fn all_components_up() {
    let harness = harness();
    let components = harness.components(None);
    let summary = harness
        .up_checker()
        .validate_up(&components, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.succeeded + summary.ignored, components.len());
}

/// One full chaos iteration converges.
#[tokio::test]
#[ignore = "requires cluster"]
async fn one_iteration_converges() {
    let harness = harness();
    let mut chaos = harness.orchestrator(None);
    let report = chaos.run_iteration(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.iteration, 1);
    assert_eq!(report.validations.len(), harness.config().validations.len());
}

/// A full rotation of seven iterations converges every time.
#[tokio::test]
#[ignore = "requires cluster"]
async fn full_rotation_converges() {
    let harness = harness();
    let mut chaos = harness.orchestrator(None);
    let cancel = CancellationToken::new();
    for _ in 0..7 {
        chaos.run_iteration(&cancel).await.unwrap();
    }
    // leave nothing stopped
    chaos
        .ensure_all_started(&chaos.pending_restarts().to_vec(), &cancel)
        .await
        .unwrap();
}
