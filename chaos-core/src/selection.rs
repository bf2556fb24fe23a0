//! Random fault selection.
//!
//! A [`SelectionStrategy`] turns a population size into a victim count;
//! [`select_random`] shuffles the population and takes that many. Randomness
//! comes from the caller's `Rng` so runs can be replayed from a seed.

use chaos_types::{Component, Selector, Topology};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Invalid selection strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// Percentage above 100.
    #[error("percentage {0} is above 100")]
    PercentOutOfRange(u32),

    /// Range with min above max.
    #[error("percentage range {min}-{max} is empty")]
    EmptyRange {
        /// Lower bound.
        min: u32,
        /// Upper bound.
        max: u32,
    },

    /// Strategy text could not be parsed.
    #[error("invalid strategy {0:?}: expected N, random, P% or A-B%")]
    Parse(String),
}

/// How many components to pick from a population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Always `count` components.
    Fixed {
        /// Number of components.
        count: usize,
    },
    /// Uniformly random count in `1..=population`.
    RandomOfTotal,
    /// `floor(population * percent / 100)` components.
    Percentage {
        /// Percent of the population.
        percent: u32,
    },
    /// A percentage drawn uniformly from `min..=max`.
    PercentageRange {
        /// Lowest percentage.
        min: u32,
        /// Highest percentage.
        max: u32,
    },
}

impl SelectionStrategy {
    /// Check percentages are within bounds.
    pub fn validate(&self) -> Result<(), SelectionError> {
        match *self {
            SelectionStrategy::Percentage { percent } if percent > 100 => {
                Err(SelectionError::PercentOutOfRange(percent))
            }
            SelectionStrategy::PercentageRange { max, .. } if max > 100 => {
                Err(SelectionError::PercentOutOfRange(max))
            }
            SelectionStrategy::PercentageRange { min, max } if min > max => {
                Err(SelectionError::EmptyRange { min, max })
            }
            _ => Ok(()),
        }
    }

    /// Number of components to select out of `population`.
    ///
    /// May exceed `population` for `Fixed`; [`select_random`] clamps it.
    pub fn count<R: Rng + ?Sized>(&self, population: usize, rng: &mut R) -> usize {
        match *self {
            SelectionStrategy::Fixed { count } => count,
            SelectionStrategy::RandomOfTotal => {
                if population == 0 {
                    0
                } else {
                    rng.gen_range(1..=population)
                }
            }
            SelectionStrategy::Percentage { percent } => percent_of(population, percent),
            SelectionStrategy::PercentageRange { min, max } => {
                let percent = rng.gen_range(min.min(max)..=max.max(min));
                percent_of(population, percent)
            }
        }
    }
}

fn percent_of(population: usize, percent: u32) -> usize {
    population.saturating_mul(percent as usize) / 100
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionStrategy::Fixed { count } => write!(f, "{}", count),
            SelectionStrategy::RandomOfTotal => write!(f, "random"),
            SelectionStrategy::Percentage { percent } => write!(f, "{}%", percent),
            SelectionStrategy::PercentageRange { min, max } => write!(f, "{}-{}%", min, max),
        }
    }
}

impl FromStr for SelectionStrategy {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |v: &str| v.trim().parse::<u32>().map_err(|_| SelectionError::Parse(s.to_string()));

        let strategy = if s.eq_ignore_ascii_case("random") {
            SelectionStrategy::RandomOfTotal
        } else if let Some(pct) = s.strip_suffix('%') {
            match pct.split_once('-') {
                Some((min, max)) => SelectionStrategy::PercentageRange {
                    min: parse(min)?,
                    max: parse(max)?,
                },
                None => SelectionStrategy::Percentage {
                    percent: parse(pct)?,
                },
            }
        } else {
            SelectionStrategy::Fixed {
                count: parse(s)? as usize,
            }
        };
        strategy.validate()?;
        Ok(strategy)
    }
}

/// Pick a random subset of `items` according to `strategy`.
///
/// Never returns duplicates or more than `items.len()` entries. A computed
/// count below one yields an empty selection.
pub fn select_random<T, R>(items: &[T], strategy: &SelectionStrategy, rng: &mut R) -> Vec<T>
where
    T: Clone,
    R: Rng + ?Sized,
{
    let count = strategy.count(items.len(), rng).min(items.len());
    if count < 1 {
        return Vec::new();
    }
    let mut shuffled = items.to_vec();
    shuffled.shuffle(rng);
    shuffled.truncate(count);
    shuffled
}

/// Pick victims among the components of `topology` matching `selector`.
pub fn select_components<R: Rng + ?Sized>(
    topology: &Topology,
    selector: &Selector,
    strategy: &SelectionStrategy,
    rng: &mut R,
) -> Vec<Component> {
    select_random(&topology.select(selector), strategy, rng)
}
