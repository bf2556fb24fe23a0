//! Chaos harness: turns a [`Config`] into a ready-to-run chaos stack.
//!
//! The harness owns the collaborators every chaos run needs and builds the
//! orchestrator, validator, up checker and churn engine from them:
//! - One [`ControllerSession`] per selected controller, sharing one authenticator
//! - Lifecycle control picked from each component's runtime
//! - The management-channel validation client
//! - An edge API provider backed by a random controller session
//!
//! Each collaborator can be swapped out, which is how dry runs and tests
//! drive a full iteration without a cluster.

use std::sync::Arc;

use chaos_client::{Authenticator, ControllerSession, RestAuthenticator, ValidationClient};
use chaos_core::Category;
use chaos_types::{Component, Selector, Topology};

use crate::churn::EntityChurn;
use crate::cluster::ClusterValidator;
use crate::config::Config;
use crate::convergence::{ConvergencePoller, ValidationProbe};
use crate::edge::{EdgeProvider, SessionEdgeProvider};
use crate::error::ChaosError;
use crate::lifecycle::{ComponentControl, DefaultControl};
use crate::orchestrator::ChaosOrchestrator;
use crate::scheduler::TaskScheduler;
use crate::up::{IdCache, UpChecker};

/// Configured collaborators of a chaos run.
pub struct ChaosHarness {
    config: Config,
    topology: Topology,
    sessions: Vec<Arc<ControllerSession>>,
    control: Arc<dyn ComponentControl>,
    probe: Arc<dyn ValidationProbe>,
    edge: Arc<dyn EdgeProvider>,
    ids: Arc<IdCache>,
}

impl std::fmt::Debug for ChaosHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosHarness")
            .field("components", &self.topology.len())
            .field("controllers", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl ChaosHarness {
    /// Validate `config` and build the production collaborators.
    ///
    /// Nothing connects yet; sessions authenticate on first use.
    pub fn from_config(config: Config) -> Result<Self, ChaosError> {
        config.validate()?;
        let topology = config.topology()?;
        let timing = &config.timing;

        let authenticator: Arc<dyn Authenticator> = Arc::new(
            RestAuthenticator::new(config.credentials(), timing.rest_timeout())
                .with_insecure(config.auth.insecure_tls),
        );
        let sessions = build_sessions(&topology, &config, authenticator);
        let edge = Arc::new(
            SessionEdgeProvider::new(sessions.clone(), timing.auth_max_age(), timing.rest_timeout())
                .with_insecure(config.auth.insecure_tls),
        );

        tracing::info!(
            components = topology.len(),
            controllers = sessions.len(),
            "chaos harness configured"
        );

        Ok(Self {
            control: Arc::new(DefaultControl::new(timing.ssh_connect_timeout())),
            probe: Arc::new(ValidationClient::tcp(timing.connect_timeout(), timing.send_timeout())),
            edge,
            ids: Arc::new(IdCache::new()),
            sessions,
            topology,
            config,
        })
    }

    /// Authenticate controller sessions with `authenticator` instead.
    ///
    /// The edge provider is rebuilt on the new sessions.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.sessions = build_sessions(&self.topology, &self.config, authenticator);
        let timing = &self.config.timing;
        self.edge = Arc::new(
            SessionEdgeProvider::new(self.sessions.clone(), timing.auth_max_age(), timing.rest_timeout())
                .with_insecure(self.config.auth.insecure_tls),
        );
        self
    }

    /// Drive component lifecycles with `control` instead.
    pub fn with_control(mut self, control: Arc<dyn ComponentControl>) -> Self {
        self.control = control;
        self
    }

    /// Validate through `probe` instead of the management channel.
    pub fn with_probe(mut self, probe: Arc<dyn ValidationProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Reach the edge API through `edge` instead.
    pub fn with_edge(mut self, edge: Arc<dyn EdgeProvider>) -> Self {
        self.edge = edge;
        self
    }

    /// Loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cluster topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Controller sessions, in topology order.
    pub fn sessions(&self) -> &[Arc<ControllerSession>] {
        &self.sessions
    }

    /// Cluster validator with the configured deadline and retry interval.
    pub fn validator(&self) -> ClusterValidator {
        let timing = &self.config.timing;
        let poller = ConvergencePoller::new(Arc::clone(&self.probe))
            .with_retry_interval(timing.retry_interval())
            .with_auth_max_age(timing.auth_max_age());
        ClusterValidator::new(poller, self.sessions.clone(), timing.validation_deadline())
    }

    /// Up checker covering process state and router online status.
    pub fn up_checker(&self) -> UpChecker {
        let concurrency = Category::ALL
            .iter()
            .map(|c| self.config.chaos.get(*c).concurrency)
            .max()
            .unwrap_or(1);
        UpChecker::new(
            Arc::clone(&self.control),
            TaskScheduler::new(concurrency, self.config.lifecycle_policy()),
            self.config.timing.up_check_timeout(),
        )
        .with_edge(Arc::clone(&self.edge), Arc::clone(&self.ids))
    }

    /// Entity churn engine.
    pub fn churn(&self) -> EntityChurn {
        EntityChurn::new(
            Arc::clone(&self.edge),
            self.config.churn.clone(),
            TaskScheduler::new(self.config.churn.concurrency, self.config.entity_policy()),
        )
    }

    /// Orchestrator for a chaos run. Churn is attached if enabled.
    pub fn orchestrator(&self, seed: Option<u64>) -> ChaosOrchestrator {
        let mut orchestrator = ChaosOrchestrator::new(
            self.topology.clone(),
            self.config.chaos.clone(),
            Arc::clone(&self.control),
            self.validator(),
        )
        .with_lifecycle_policy(self.config.lifecycle_policy())
        .with_failure_policy(self.config.failure_policy())
        .with_validations(self.config.validations.clone())
        .with_up_checker(self.up_checker());

        if let Some(seed) = seed {
            orchestrator = orchestrator.with_seed(seed);
        }
        if self.config.churn.enabled {
            orchestrator = orchestrator.with_churn(self.churn());
        }
        orchestrator
    }

    /// Components picked by `selector`, or all components.
    pub fn components(&self, selector: Option<&Selector>) -> Vec<Component> {
        match selector {
            Some(selector) => self.topology.select(selector),
            None => self.topology.iter().cloned().collect(),
        }
    }
}

fn build_sessions(
    topology: &Topology,
    config: &Config,
    authenticator: Arc<dyn Authenticator>,
) -> Vec<Arc<ControllerSession>> {
    topology
        .select(&config.controller_selector)
        .into_iter()
        .map(|controller| Arc::new(ControllerSession::new(controller, Arc::clone(&authenticator))))
        .collect()
}
