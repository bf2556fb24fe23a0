//! Chaos iterations: inject faults, churn entities, validate convergence.
//!
//! Each iteration takes the next scenario from the orchestrator's rotation,
//! picks victims in every disturbed category, restarts or stops them with
//! the category's concurrency limit, optionally churns edge entities, and
//! finally validates that every controller converges. Components stopped in
//! one iteration are started again at the beginning of the next.

use std::sync::Arc;

use chaos_core::{select_components, Category, RetryPolicy, Scenario, ScenarioRotation, TaskError};
use chaos_types::{Component, Topology, ValidationKind, ValidationRequest};
use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use crate::churn::EntityChurn;
use crate::cluster::ClusterValidator;
use crate::config::{ChaosConfig, FaultAction};
use crate::convergence::Convergence;
use crate::error::ChaosError;
use crate::lifecycle::ComponentControl;
use crate::scheduler::{ExecutionSummary, FailurePolicy, LabeledTask, SchedulerError, TaskScheduler};
use crate::up::UpChecker;

/// Victims of one category in one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryFaults {
    /// Category.
    pub category: Category,
    /// Restart or stop.
    pub action: FaultAction,
    /// Component ids.
    pub victims: Vec<String>,
}

/// Outcome of one validation kind across the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindValidation {
    /// Validation kind.
    pub kind: ValidationKind,
    /// One result per controller.
    pub controllers: Vec<Convergence>,
}

/// What one successful iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    /// 1-based iteration number.
    pub iteration: u64,
    /// Disturbed categories.
    pub scenario: Scenario,
    /// Victims per disturbed category.
    pub faults: Vec<CategoryFaults>,
    /// Fault task counts.
    pub fault_summary: ExecutionSummary,
    /// Churn task counts, if churn ran.
    pub churn: Option<ExecutionSummary>,
    /// Validation results, in configured order.
    pub validations: Vec<KindValidation>,
}

impl IterationReport {
    /// Total number of disturbed components.
    pub fn victim_count(&self) -> usize {
        self.faults.iter().map(|f| f.victims.len()).sum()
    }
}

/// Drives chaos iterations against one cluster.
pub struct ChaosOrchestrator {
    topology: Topology,
    faults: ChaosConfig,
    control: Arc<dyn ComponentControl>,
    lifecycle_policy: RetryPolicy,
    failure_policy: FailurePolicy,
    validator: ClusterValidator,
    validations: Vec<ValidationKind>,
    churn: Option<EntityChurn>,
    up_checker: Option<UpChecker>,
    rotation: ScenarioRotation,
    rng: StdRng,
    stopped: Vec<Category>,
    iteration: u64,
}

impl std::fmt::Debug for ChaosOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosOrchestrator")
            .field("components", &self.topology.len())
            .field("rotation", &self.rotation)
            .field("iteration", &self.iteration)
            .finish_non_exhaustive()
    }
}

impl ChaosOrchestrator {
    /// Orchestrator with an entropy-seeded rng and a random rotation start.
    pub fn new(
        topology: Topology,
        faults: ChaosConfig,
        control: Arc<dyn ComponentControl>,
        validator: ClusterValidator,
    ) -> Self {
        let mut rng = StdRng::from_entropy();
        let rotation = ScenarioRotation::new_random(&mut rng);
        Self {
            topology,
            faults,
            control,
            lifecycle_policy: RetryPolicy::default(),
            failure_policy: FailurePolicy::default(),
            validator,
            validations: ValidationKind::ALL.to_vec(),
            churn: None,
            up_checker: None,
            rotation,
            rng,
            stopped: Vec::new(),
            iteration: 0,
        }
    }

    /// Seed victim selection and the rotation start.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.rotation = ScenarioRotation::new_random(&mut self.rng);
        self
    }

    /// Continue from an existing rotation.
    pub fn with_rotation(mut self, rotation: ScenarioRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Retry policy of lifecycle tasks.
    pub fn with_lifecycle_policy(mut self, policy: RetryPolicy) -> Self {
        self.lifecycle_policy = policy;
        self
    }

    /// What a reported fault task does to the rest of its batch.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Validations to run after each iteration.
    pub fn with_validations(mut self, validations: Vec<ValidationKind>) -> Self {
        self.validations = validations;
        self
    }

    /// Churn entities each iteration.
    pub fn with_churn(mut self, churn: EntityChurn) -> Self {
        self.churn = Some(churn);
        self
    }

    /// Check restarted components are up before validating.
    pub fn with_up_checker(mut self, up_checker: UpChecker) -> Self {
        self.up_checker = Some(up_checker);
        self
    }

    /// Rotation state, to carry into a later orchestrator.
    pub fn rotation(&self) -> &ScenarioRotation {
        &self.rotation
    }

    /// Categories whose stopped components will be started next iteration.
    pub fn pending_restarts(&self) -> &[Category] {
        &self.stopped
    }

    /// Run one chaos iteration.
    pub async fn run_iteration(&mut self, cancel: &CancellationToken) -> Result<IterationReport, ChaosError> {
        self.iteration += 1;
        let iteration = self.iteration;

        if !self.stopped.is_empty() {
            let categories = std::mem::take(&mut self.stopped);
            if let Err(e) = self.ensure_all_started(&categories, cancel).await {
                self.stopped = categories;
                return Err(ChaosError::Restore(e));
            }
        }

        let scenario = self.rotation.next_scenario();
        tracing::info!(iteration, scenario = %scenario, "starting chaos iteration");

        let mut faults = Vec::new();
        let mut batches = Vec::new();
        for category in scenario.categories() {
            let fault = self.faults.get(category).clone();
            let victims = select_components(&self.topology, &fault.selector, &fault.selection, &mut self.rng);
            let tasks = victims
                .iter()
                .map(|victim| self.fault_task(category, fault.action, victim))
                .collect::<Result<Vec<_>, TaskError>>()
                .map_err(ChaosError::Lifecycle)?;

            tracing::info!(
                category = %category,
                action = fault.action.verb(),
                victims = victims.len(),
                concurrency = fault.concurrency,
                "selected victims"
            );
            faults.push(CategoryFaults {
                category,
                action: fault.action,
                victims: victims.iter().map(|v| v.id.clone()).collect(),
            });
            batches.push((self.scheduler(fault.concurrency), tasks));
        }

        self.stopped = faults
            .iter()
            .filter(|f| f.action == FaultAction::Stop && !f.victims.is_empty())
            .map(|f| f.category)
            .collect();

        let results = join_all(
            batches
                .into_iter()
                .map(|(scheduler, tasks)| async move { scheduler.execute(tasks, cancel).await }),
        )
        .await;
        let fault_summary = merge_results(results).map_err(ChaosError::Faults)?;

        let churn = match &self.churn {
            Some(churn) => Some(churn.run(&mut self.rng, cancel).await?),
            None => None,
        };

        if let Some(up_checker) = &self.up_checker {
            let restarted: Vec<Component> = faults
                .iter()
                .filter(|f| f.action == FaultAction::Restart)
                .flat_map(|f| f.victims.iter())
                .filter_map(|id| self.topology.get(id).cloned())
                .collect();
            up_checker
                .validate_up(&restarted, cancel)
                .await
                .map_err(ChaosError::NotUp)?;
        }

        let validations = self.validate_cluster(cancel).await?;
        tracing::info!(iteration, scenario = %scenario, "chaos iteration converged");

        Ok(IterationReport {
            iteration,
            scenario,
            faults,
            fault_summary,
            churn,
            validations,
        })
    }

    /// Run every configured validation kind across the cluster, in order.
    pub async fn validate_cluster(&self, cancel: &CancellationToken) -> Result<Vec<KindValidation>, ChaosError> {
        let mut results = Vec::with_capacity(self.validations.len());
        for kind in &self.validations {
            if cancel.is_cancelled() {
                return Err(ChaosError::Cancelled);
            }
            let controllers = self.validator.validate(&ValidationRequest::new(*kind), cancel).await?;
            results.push(KindValidation {
                kind: *kind,
                controllers,
            });
        }
        Ok(results)
    }

    /// Start every controllable component of `categories`.
    pub async fn ensure_all_started(
        &self,
        categories: &[Category],
        cancel: &CancellationToken,
    ) -> Result<ExecutionSummary, SchedulerError> {
        let batches: Vec<_> = categories
            .iter()
            .map(|category| {
                let fault = self.faults.get(*category);
                let tasks: Vec<_> = self
                    .topology
                    .select(&fault.selector)
                    .iter()
                    .filter_map(|component| self.start_task(*category, component))
                    .collect();
                tracing::info!(category = %category, components = tasks.len(), "ensuring components are started");
                (self.scheduler(fault.concurrency), tasks)
            })
            .collect();

        let results = join_all(
            batches
                .into_iter()
                .map(|(scheduler, tasks)| async move { scheduler.execute(tasks, cancel).await }),
        )
        .await;
        merge_results(results)
    }

    fn scheduler(&self, concurrency: usize) -> TaskScheduler {
        TaskScheduler::new(concurrency, self.lifecycle_policy).with_failure_policy(self.failure_policy)
    }

    fn fault_task(&self, category: Category, action: FaultAction, victim: &Component) -> Result<LabeledTask, TaskError> {
        let driver = self.control.lifecycle(victim)?;
        Ok(LabeledTask::new(
            format!("{}.{}", action.verb(), category.short_name()),
            format!("{} {} {}", action.verb(), victim.kind, victim.id),
            move || {
                let driver = Arc::clone(&driver);
                async move {
                    match action {
                        FaultAction::Restart => driver.restart().await,
                        FaultAction::Stop => driver.stop().await,
                    }
                }
            },
        ))
    }

    fn start_task(&self, category: Category, component: &Component) -> Option<LabeledTask> {
        let driver = match self.control.lifecycle(component) {
            Ok(driver) => driver,
            Err(e) => {
                tracing::debug!(component = %component.id, error = %e, "skipping start");
                return None;
            }
        };
        Some(LabeledTask::new(
            format!("start.{}", category.short_name()),
            format!("start {} {}", component.kind, component.id),
            move || {
                let driver = Arc::clone(&driver);
                async move { driver.start().await }
            },
        ))
    }
}

/// Combine per-category batch results into one.
fn merge_results(results: Vec<Result<ExecutionSummary, SchedulerError>>) -> Result<ExecutionSummary, SchedulerError> {
    let mut summary = ExecutionSummary::default();
    let mut failures = Vec::new();
    let mut cancelled = 0;
    for result in results {
        match result {
            Ok(s) => {
                summary.succeeded += s.succeeded;
                summary.ignored += s.ignored;
            }
            Err(SchedulerError::TasksFailed {
                failures: f,
                cancelled: c,
            }) => {
                failures.extend(f);
                cancelled += c;
            }
            Err(SchedulerError::Cancelled { cancelled: c }) => cancelled += c,
        }
    }
    if !failures.is_empty() {
        Err(SchedulerError::TasksFailed { failures, cancelled })
    } else if cancelled > 0 {
        Err(SchedulerError::Cancelled { cancelled })
    } else {
        Ok(summary)
    }
}
