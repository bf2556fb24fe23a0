//! # chaos-cli
//!
//! Chaos testing for distributed control-plane clusters.
//!
//! ## Commands
//!
//! - `run`: Run chaos iterations (faults, optional churn, convergence validation)
//! - `validate`: Run one validation pass across every controller
//! - `select`: Dry-run fault selection against the configured topology
//! - `up`: Check components are running
//!
//! ## Example
//!
//! ```bash
//! # Ten iterations with entity churn
//! chaos-cli --config chaos.toml run --iterations 10 --churn
//!
//! # Only check links and circuits
//! chaos-cli validate --kind router_links --kind circuits
//!
//! # Which routers would 10-75% pick?
//! chaos-cli select --selector .router --strategy 10-75% --seed 7
//! ```

use anyhow::Result;
use chaos_core::SelectionStrategy;
use chaos_types::{Selector, ValidationKind};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::{run, select, up, validate};

/// Chaos testing for distributed control-plane clusters.
#[derive(Parser, Debug)]
#[command(name = "chaos-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: ./chaos.toml, then the user config directory)
    #[arg(long, short, global = true, env = "FABRIC_CHAOS_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run chaos iterations
    Run {
        /// Number of iterations
        #[arg(long, short = 'n', default_value = "1")]
        iterations: u64,

        /// Churn entities each iteration, overriding the config
        #[arg(long)]
        churn: bool,

        /// Seed victim selection and the scenario rotation
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run one validation pass across every controller
    Validate {
        /// Validation kind (repeatable; default: the configured list)
        #[arg(long = "kind", short)]
        kinds: Vec<ValidationKind>,
    },

    /// Dry-run fault selection
    Select {
        /// Candidates: `*`, `.tag` or `#id`
        #[arg(long, short)]
        selector: Selector,

        /// `N`, `random`, `N%` or `MIN-MAX%`
        #[arg(long)]
        strategy: SelectionStrategy,

        /// Rng seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Check components are running
    Up {
        /// Components to check (default: all)
        #[arg(long, short)]
        selector: Option<Selector>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let path = config::resolve_path(cli.config);
    let config = config::load(&path)?;
    tracing::debug!(path = %path.display(), "config loaded");

    match cli.command {
        Commands::Run {
            iterations,
            churn,
            seed,
        } => {
            run::run(config, iterations, churn, seed).await?;
        }
        Commands::Validate { kinds } => {
            validate::run(config, kinds).await?;
        }
        Commands::Select {
            selector,
            strategy,
            seed,
        } => {
            select::run(&config, &selector, &strategy, seed)?;
        }
        Commands::Up { selector } => {
            up::run(config, selector).await?;
        }
    }

    Ok(())
}

/// Install the global subscriber. Logs go to stderr; `RUST_LOG` overrides the `info` default.
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}
