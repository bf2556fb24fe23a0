//! Run chaos iterations.

use anyhow::{Context, Result};
use chaos_harness::{ChaosHarness, Config, IterationReport};
use tokio_util::sync::CancellationToken;

/// Run the run command.
pub async fn run(mut config: Config, iterations: u64, churn: bool, seed: Option<u64>) -> Result<()> {
    if churn {
        config.churn.enabled = true;
    }
    let harness = ChaosHarness::from_config(config)?;
    let mut chaos = harness.orchestrator(seed);
    let cancel = cancel_on_ctrl_c();

    for n in 1..=iterations {
        let report = chaos
            .run_iteration(&cancel)
            .await
            .with_context(|| format!("chaos iteration {} of {} failed", n, iterations))?;
        print_report(&report);
    }

    if !chaos.pending_restarts().is_empty() {
        let pending = chaos.pending_restarts().to_vec();
        chaos
            .ensure_all_started(&pending, &cancel)
            .await
            .context("failed to start stopped components")?;
        println!("Started components stopped by the last iteration.");
    }

    println!("{} iteration(s) converged.", iterations);
    Ok(())
}

/// Token cancelled on the first ctrl-c.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn print_report(report: &IterationReport) {
    println!("=== iteration {} ({}) ===", report.iteration, report.scenario);
    for fault in &report.faults {
        println!(
            "  {:<12} {} {} component(s)",
            fault.category.to_string(),
            fault.action.verb(),
            fault.victims.len()
        );
    }
    if let Some(churn) = &report.churn {
        println!("  churn        {} task(s), {} ignored", churn.succeeded, churn.ignored);
    }
    for validation in &report.validations {
        let attempts: u32 = validation.controllers.iter().map(|c| c.attempts).sum();
        println!(
            "  {:<28} converged on {} controller(s), {} attempt(s)",
            validation.kind.to_string(),
            validation.controllers.len(),
            attempts
        );
    }
}
