//! Dry-run fault selection.

use anyhow::Result;
use chaos_core::{select_components, SelectionStrategy};
use chaos_harness::Config;
use chaos_types::Selector;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Pick victims without touching the cluster.
///
/// Returns the selected component ids, in selection order.
pub fn pick(config: &Config, selector: &Selector, strategy: &SelectionStrategy, seed: u64) -> Result<Vec<String>> {
    let topology = config.topology()?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(select_components(&topology, selector, strategy, &mut rng)
        .into_iter()
        .map(|c| c.id)
        .collect())
}

/// Run the select command.
pub fn run(config: &Config, selector: &Selector, strategy: &SelectionStrategy, seed: u64) -> Result<()> {
    let candidates = config.topology()?.select(selector).len();
    let picked = pick(config, selector, strategy, seed)?;

    println!(
        "Selected {} of {} component(s) matching {} ({}, seed {}):",
        picked.len(),
        candidates,
        selector,
        strategy,
        seed
    );
    for id in &picked {
        println!("  {}", id);
    }
    Ok(())
}
