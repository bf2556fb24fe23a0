//! Configuration loading for chaos runs.
//!
//! Configuration is loaded from a TOML file (default: `chaos.toml`). The
//! static cluster topology lives in the same file as `[[components]]`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chaos_client::Credentials;
use chaos_core::{Category, RetryPolicy, SelectionStrategy};
use chaos_types::{Component, Selector, Topology, ValidationKind};
use serde::{Deserialize, Serialize};

use crate::churn::ChurnConfig;
use crate::scheduler::FailurePolicy;

/// Environment variable overriding `auth.password`.
pub const PASSWORD_ENV: &str = "FABRIC_CHAOS_PASSWORD";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FABRIC_CHAOS_CONFIG";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Selects the controllers to validate and authenticate against (default: `.ctrl`).
    #[serde(default = "default_controller_selector")]
    pub controller_selector: Selector,
    /// Edge API credentials.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Deadlines and timeouts.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Task retry tuning.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Fault injection per category.
    #[serde(default)]
    pub chaos: ChaosConfig,
    /// Entity churn.
    #[serde(default)]
    pub churn: ChurnConfig,
    /// Validations run after each iteration, in order.
    #[serde(default = "default_validations")]
    pub validations: Vec<ValidationKind>,
    /// The cluster under test.
    #[serde(default)]
    pub components: Vec<Component>,
}

/// Edge API credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Username (default: admin).
    #[serde(default = "default_username")]
    pub username: String,
    /// Password; `FABRIC_CHAOS_PASSWORD` takes precedence.
    #[serde(default)]
    pub password: String,
    /// Accept self-signed controller certificates (default: true).
    #[serde(default = "default_insecure_tls")]
    pub insecure_tls: bool,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("insecure_tls", &self.insecure_tls)
            .finish()
    }
}

/// Deadlines and timeouts, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Time each controller gets to converge (default: 900).
    #[serde(default = "default_validation_deadline_secs")]
    pub validation_deadline_secs: u64,
    /// Pause between convergence attempts (default: 15).
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Management channel connect timeout (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Validation request/response timeout (default: 10).
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Re-authenticate sessions older than this (default: 300).
    #[serde(default = "default_auth_max_age_secs")]
    pub auth_max_age_secs: u64,
    /// Edge REST call timeout (default: 15).
    #[serde(default = "default_rest_timeout_secs")]
    pub rest_timeout_secs: u64,
    /// Process status check timeout (default: 30).
    #[serde(default = "default_up_check_timeout_secs")]
    pub up_check_timeout_secs: u64,
    /// SSH connect timeout (default: 30).
    #[serde(default = "default_ssh_connect_timeout_secs")]
    pub ssh_connect_timeout_secs: u64,
}

/// Task retry tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries before a failure is reported (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff unit for lifecycle and up-check tasks (default: 10).
    #[serde(default = "default_lifecycle_backoff_secs")]
    pub lifecycle_backoff_secs: u64,
    /// Backoff unit for entity churn tasks (default: 1).
    #[serde(default = "default_entity_backoff_secs")]
    pub entity_backoff_secs: u64,
    /// Cancel the rest of a fault batch once one task is reported (default: false).
    #[serde(default)]
    pub cancel_on_report: bool,
}

/// What to do to a selected victim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultAction {
    /// Stop and start the process.
    #[default]
    Restart,
    /// Stop the process; it is started again before the next iteration.
    Stop,
}

impl FaultAction {
    /// Verb used in task kinds (`restart.router`).
    pub fn verb(&self) -> &'static str {
        match self {
            FaultAction::Restart => "restart",
            FaultAction::Stop => "stop",
        }
    }
}

/// Fault injection for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Candidates for this category.
    pub selector: Selector,
    /// How many candidates to disturb.
    pub selection: SelectionStrategy,
    /// Restart or stop (default: restart).
    #[serde(default)]
    pub action: FaultAction,
    /// Concurrent lifecycle tasks (default: 10).
    #[serde(default = "default_fault_concurrency")]
    pub concurrency: usize,
}

/// Fault injection for every category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaosConfig {
    /// Controllers (default: a random 1..=N of `.ctrl`).
    #[serde(default = "default_controller_faults")]
    pub controllers: FaultConfig,
    /// Routers (default: 10-75% of `.router`).
    #[serde(default = "default_router_faults")]
    pub routers: FaultConfig,
    /// Hosted applications (default: 10% of `.host`).
    #[serde(default = "default_hosted_app_faults")]
    pub hosted_apps: FaultConfig,
}

impl ChaosConfig {
    /// Settings for `category`.
    pub fn get(&self, category: Category) -> &FaultConfig {
        match category {
            Category::Controllers => &self.controllers,
            Category::Routers => &self.routers,
            Category::HostedApps => &self.hosted_apps,
        }
    }
}

// Default value functions
fn default_controller_selector() -> Selector {
    Selector::Tag("ctrl".to_string())
}

fn default_validations() -> Vec<ValidationKind> {
    ValidationKind::ALL.to_vec()
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_insecure_tls() -> bool {
    true
}

fn default_validation_deadline_secs() -> u64 {
    15 * 60 // 15 minutes
}

fn default_retry_interval_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_auth_max_age_secs() -> u64 {
    5 * 60 // 5 minutes
}

fn default_rest_timeout_secs() -> u64 {
    15
}

fn default_up_check_timeout_secs() -> u64 {
    30
}

fn default_ssh_connect_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    chaos_core::DEFAULT_MAX_ATTEMPTS
}

fn default_lifecycle_backoff_secs() -> u64 {
    10
}

fn default_entity_backoff_secs() -> u64 {
    1
}

fn default_fault_concurrency() -> usize {
    10
}

fn default_controller_faults() -> FaultConfig {
    FaultConfig {
        selector: Selector::Tag("ctrl".to_string()),
        selection: SelectionStrategy::RandomOfTotal,
        action: FaultAction::Restart,
        concurrency: 3,
    }
}

fn default_router_faults() -> FaultConfig {
    FaultConfig {
        selector: Selector::Tag("router".to_string()),
        selection: SelectionStrategy::PercentageRange { min: 10, max: 75 },
        action: FaultAction::Restart,
        concurrency: 50,
    }
}

fn default_hosted_app_faults() -> FaultConfig {
    FaultConfig {
        selector: Selector::Tag("host".to_string()),
        selection: SelectionStrategy::Percentage { percent: 10 },
        action: FaultAction::Restart,
        concurrency: default_fault_concurrency(),
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: String::new(),
            insecure_tls: default_insecure_tls(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            validation_deadline_secs: default_validation_deadline_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            auth_max_age_secs: default_auth_max_age_secs(),
            rest_timeout_secs: default_rest_timeout_secs(),
            up_check_timeout_secs: default_up_check_timeout_secs(),
            ssh_connect_timeout_secs: default_ssh_connect_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            lifecycle_backoff_secs: default_lifecycle_backoff_secs(),
            entity_backoff_secs: default_entity_backoff_secs(),
            cancel_on_report: false,
        }
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            controllers: default_controller_faults(),
            routers: default_router_faults(),
            hosted_apps: default_hosted_app_faults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller_selector: default_controller_selector(),
            auth: AuthConfig::default(),
            timing: TimingConfig::default(),
            retry: RetryConfig::default(),
            chaos: ChaosConfig::default(),
            churn: ChurnConfig::default(),
            validations: default_validations(),
            components: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        for category in Category::ALL {
            let fault = self.chaos.get(category);
            if fault.concurrency == 0 {
                return invalid(format!("chaos.{}: concurrency must be at least 1", category));
            }
            if let Err(e) = fault.selection.validate() {
                return invalid(format!("chaos.{}: {}", category, e));
            }
        }
        if self.churn.enabled && self.churn.concurrency == 0 {
            return invalid("churn: concurrency must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry: max_attempts must be at least 1".to_string());
        }
        if self.timing.validation_deadline_secs == 0 {
            return invalid("timing: validation_deadline_secs must be positive".to_string());
        }

        let topology = self.topology()?;
        if topology.is_empty() {
            return invalid("no components configured".to_string());
        }
        if topology.select(&self.controller_selector).is_empty() {
            return invalid(format!("controller selector {} matches no components", self.controller_selector));
        }
        Ok(())
    }

    /// The static topology.
    pub fn topology(&self) -> Result<Topology, ConfigError> {
        Topology::new(self.components.clone()).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Credentials, with the password taken from `FABRIC_CHAOS_PASSWORD` if set.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.auth.username.clone(),
            password: std::env::var(PASSWORD_ENV).unwrap_or_else(|_| self.auth.password.clone()),
        }
    }

    /// Retry policy of lifecycle and up-check tasks.
    pub fn lifecycle_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_unit: Duration::from_secs(self.retry.lifecycle_backoff_secs),
        }
    }

    /// Retry policy of entity churn tasks.
    pub fn entity_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_unit: Duration::from_secs(self.retry.entity_backoff_secs),
        }
    }

    /// What a reported fault task does to its siblings.
    pub fn failure_policy(&self) -> FailurePolicy {
        if self.retry.cancel_on_report {
            FailurePolicy::CancelOnReport
        } else {
            FailurePolicy::RunToCompletion
        }
    }

    /// Default config file location (`./chaos.toml`).
    pub fn default_path() -> PathBuf {
        PathBuf::from("chaos.toml")
    }
}

impl TimingConfig {
    /// Convergence deadline per controller.
    pub fn validation_deadline(&self) -> Duration {
        Duration::from_secs(self.validation_deadline_secs)
    }

    /// Pause between convergence attempts.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Management channel connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validation request/response timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Session staleness threshold.
    pub fn auth_max_age(&self) -> Duration {
        Duration::from_secs(self.auth_max_age_secs)
    }

    /// Edge REST call timeout.
    pub fn rest_timeout(&self) -> Duration {
        Duration::from_secs(self.rest_timeout_secs)
    }

    /// Process status check timeout.
    pub fn up_check_timeout(&self) -> Duration {
        Duration::from_secs(self.up_check_timeout_secs)
    }

    /// SSH connect timeout.
    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_timeout_secs)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },
    /// Configuration parsed but cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
