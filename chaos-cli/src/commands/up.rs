//! Check components are up.

use anyhow::{Context, Result};
use chaos_harness::{ChaosHarness, Config};
use chaos_types::Selector;

use super::run::cancel_on_ctrl_c;

/// Run the up command against `selector`, or every component.
pub async fn run(config: Config, selector: Option<Selector>) -> Result<()> {
    let harness = ChaosHarness::from_config(config)?;
    let components = harness.components(selector.as_ref());
    if components.is_empty() {
        anyhow::bail!("no components match the selector");
    }

    let summary = harness
        .up_checker()
        .validate_up(&components, &cancel_on_ctrl_c())
        .await
        .context("components are not up")?;

    println!(
        "{} component(s) up ({} checks skipped).",
        summary.succeeded, summary.ignored
    );
    Ok(())
}
