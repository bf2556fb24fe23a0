//! Scenario rotation across chaos iterations.
//!
//! A scenario is a non-empty subset of {controllers, routers, hosted apps}.
//! The rotation cycles through all seven subsets so every combination is
//! exercised within seven iterations, starting from a random point.

use rand::Rng;
use std::fmt;

/// A category of components that can be disturbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Controllers.
    Controllers,
    /// Routers.
    Routers,
    /// Hosted applications.
    HostedApps,
}

impl Category {
    /// All categories in disturbance order.
    pub const ALL: [Category; 3] = [Category::Controllers, Category::Routers, Category::HostedApps];

    fn bit(self) -> u8 {
        match self {
            Category::Controllers => 0b001,
            Category::Routers => 0b010,
            Category::HostedApps => 0b100,
        }
    }

    /// Short name used in task kinds (`restart.ctrl`, `stop.host`).
    pub fn short_name(self) -> &'static str {
        match self {
            Category::Controllers => "ctrl",
            Category::Routers => "router",
            Category::HostedApps => "host",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Controllers => write!(f, "controllers"),
            Category::Routers => write!(f, "routers"),
            Category::HostedApps => write!(f, "hosted apps"),
        }
    }
}

/// Bitmask of categories to disturb in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scenario(u8);

impl Scenario {
    /// Build from a raw mask; only the low three bits are kept.
    pub fn from_bits(bits: u8) -> Self {
        Scenario(bits & 0b111)
    }

    /// Raw mask.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// True if `category` is disturbed.
    pub fn includes(&self, category: Category) -> bool {
        self.0 & category.bit() != 0
    }

    /// Disturbed categories in order.
    pub fn categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.includes(*c))
            .collect()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.categories().iter().map(|c| c.to_string()).collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("+"))
        }
    }
}

/// Rotation state owned by the orchestrator and carried between iterations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioRotation {
    counter: u8,
}

impl ScenarioRotation {
    /// Start at a random point in the cycle.
    pub fn new_random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            counter: rng.gen_range(0..7),
        }
    }

    /// Start at a fixed point in the cycle (taken modulo 7).
    pub fn starting_at(counter: u8) -> Self {
        Self { counter: counter % 7 }
    }

    /// Scenario for the next iteration.
    pub fn next_scenario(&mut self) -> Scenario {
        let scenario = Scenario::from_bits(self.counter + 1);
        self.counter = (self.counter + 1) % 7;
        scenario
    }
}
