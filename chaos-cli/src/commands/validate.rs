//! Run one validation pass across every controller.

use anyhow::{Context, Result};
use chaos_harness::{ChaosHarness, Config};
use chaos_types::ValidationKind;

use super::run::cancel_on_ctrl_c;

/// Run the validate command. An empty `kinds` runs the configured validations.
pub async fn run(mut config: Config, kinds: Vec<ValidationKind>) -> Result<()> {
    if !kinds.is_empty() {
        config.validations = kinds;
    }
    let harness = ChaosHarness::from_config(config)?;
    let chaos = harness.orchestrator(None);

    let results = chaos
        .validate_cluster(&cancel_on_ctrl_c())
        .await
        .context("cluster validation failed")?;

    for result in &results {
        println!("{}:", result.kind);
        for c in &result.controllers {
            println!(
                "  {:<16} clean after {} attempt(s), {} detail(s), {:.1}s",
                c.controller,
                c.attempts,
                c.report.expected,
                c.elapsed.as_secs_f64()
            );
        }
    }
    println!("Cluster converged.");
    Ok(())
}
