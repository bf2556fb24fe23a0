//! Full chaos iterations against stub components and an in-memory edge API.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chaos_client::{EdgeApi, EntityType};
use chaos_core::{Category, RetryPolicy, ScenarioRotation, SelectionStrategy, TaskError};
use chaos_types::{Topology, ValidationKind};
use tokio_util::sync::CancellationToken;

use crate::churn::{ChurnConfig, EntityChurn};
use crate::cluster::ClusterValidator;
use crate::config::{ChaosConfig, FaultAction};
use crate::convergence::ConvergencePoller;
use crate::error::ChaosError;
use crate::orchestrator::ChaosOrchestrator;
use crate::scheduler::TaskScheduler;
use crate::testing::{controller_sessions, topology, FakeEdge, ScriptedProbe, StubControl};
use crate::up::UpChecker;

fn orchestrator(
    topology: Topology,
    faults: ChaosConfig,
    control: &Arc<StubControl>,
    probe: &Arc<ScriptedProbe>,
    rotation: u8,
) -> ChaosOrchestrator {
    let poller = ConvergencePoller::new(probe.clone()).with_retry_interval(Duration::from_secs(15));
    let validator = ClusterValidator::new(poller, controller_sessions(3), Duration::from_secs(900));
    ChaosOrchestrator::new(topology, faults, control.clone(), validator)
        .with_seed(7)
        .with_rotation(ScenarioRotation::starting_at(rotation))
        .with_lifecycle_policy(RetryPolicy::with_backoff_unit(Duration::from_secs(10)))
        .with_validations(vec![ValidationKind::RouterLinks])
}

fn victims(report: &crate::orchestrator::IterationReport, category: Category) -> Vec<String> {
    report
        .faults
        .iter()
        .find(|f| f.category == category)
        .map(|f| f.victims.clone())
        .unwrap_or_default()
}

/// Controllers and 15% of 100 routers restarted, then the cluster converges.
#[tokio::test(start_paused = true)]
async fn restart_routers_and_controllers_then_converge() {
    let control = Arc::new(StubControl::new().with_delay(Duration::from_secs(2)));
    let probe = Arc::new(ScriptedProbe::clean_after(2, 3));
    let mut faults = ChaosConfig::default();
    faults.routers.selection = SelectionStrategy::Percentage { percent: 15 };

    // starting_at(2) is controllers + routers
    let mut chaos = orchestrator(topology(3, 100, 0), faults, &control, &probe, 2);
    let report = chaos.run_iteration(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.iteration, 1);
    assert_eq!(report.scenario.categories(), [Category::Controllers, Category::Routers]);
    let routers = victims(&report, Category::Routers);
    let controllers = victims(&report, Category::Controllers);
    assert_eq!(routers.len(), 15);
    assert!((1..=3).contains(&controllers.len()));
    assert_eq!(report.fault_summary.succeeded, routers.len() + controllers.len());
    assert_eq!(control.ops_for("restart").len(), report.victim_count());

    assert_eq!(report.validations.len(), 1);
    let ctrls: Vec<_> = report.validations[0]
        .controllers
        .iter()
        .map(|c| (c.controller.as_str(), c.attempts))
        .collect();
    assert_eq!(ctrls, [("ctrl1", 2), ("ctrl2", 2), ("ctrl3", 2)]);
}

/// Router restarts never exceed the category's concurrency limit.
#[tokio::test(start_paused = true)]
async fn router_restarts_respect_concurrency() {
    let control = Arc::new(StubControl::new().with_delay(Duration::from_secs(2)));
    let probe = Arc::new(ScriptedProbe::always(0));
    let mut faults = ChaosConfig::default();
    faults.routers.selection = SelectionStrategy::Percentage { percent: 80 };
    faults.routers.concurrency = 50;

    // starting_at(1) is routers only
    let mut chaos = orchestrator(topology(3, 100, 0), faults, &control, &probe, 1);
    let report = chaos.run_iteration(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.victim_count(), 80);
    assert_eq!(control.ops_for("restart").len(), 80);
    assert_eq!(control.peak_concurrency(), 50);
}

/// Stopped routers are started again before the next iteration's faults.
#[tokio::test(start_paused = true)]
async fn stopped_components_restart_next_iteration() {
    let control = Arc::new(StubControl::new());
    let probe = Arc::new(ScriptedProbe::always(0));
    let mut faults = ChaosConfig::default();
    faults.routers.selection = SelectionStrategy::Fixed { count: 2 };
    faults.routers.action = FaultAction::Stop;
    faults.controllers.selection = SelectionStrategy::Fixed { count: 1 };

    let mut chaos = orchestrator(topology(3, 10, 0), faults, &control, &probe, 1);
    let cancel = CancellationToken::new();

    let first = chaos.run_iteration(&cancel).await.unwrap();
    let stopped = victims(&first, Category::Routers);
    assert_eq!(stopped.len(), 2);
    assert!(stopped.iter().all(|id| !control.is_running(id)));
    assert_eq!(chaos.pending_restarts(), [Category::Routers]);

    let second = chaos.run_iteration(&cancel).await.unwrap();
    assert_eq!(control.ops_for("start").len(), 10);
    let stopped_again = victims(&second, Category::Routers);
    for id in &stopped {
        if !stopped_again.contains(id) {
            assert!(control.is_running(id), "{id} should have been started");
        }
    }
    assert_eq!(victims(&second, Category::Controllers).len(), 1);
}

/// A victim without a lifecycle driver fails the iteration before any fault.
#[tokio::test(start_paused = true)]
async fn unsupported_victim_fails_before_injection() {
    let control = Arc::new(StubControl::new());
    control.unsupported("router-1");
    let probe = Arc::new(ScriptedProbe::always(0));
    let mut faults = ChaosConfig::default();
    faults.routers.selection = SelectionStrategy::Fixed { count: 2 };

    let mut chaos = orchestrator(topology(3, 2, 0), faults, &control, &probe, 1);
    let err = chaos.run_iteration(&CancellationToken::new()).await.unwrap_err();

    match err {
        ChaosError::Lifecycle(TaskError::Unsupported { component, .. }) => assert_eq!(component, "router-1"),
        other => panic!("expected lifecycle error, got {other}"),
    }
    assert!(control.ops().is_empty());
    assert_eq!(probe.calls(), 0);
}

/// A victim that keeps failing is reported after its retries; validation is skipped.
#[tokio::test(start_paused = true)]
async fn failing_restart_is_reported_after_retries() {
    let control = Arc::new(StubControl::new());
    control.fail("router-1");
    let probe = Arc::new(ScriptedProbe::always(0));
    let mut faults = ChaosConfig::default();
    faults.routers.selection = SelectionStrategy::Fixed { count: 3 };

    let mut chaos = orchestrator(topology(3, 3, 0), faults, &control, &probe, 1);
    let err = chaos.run_iteration(&CancellationToken::new()).await.unwrap_err();

    let err = match err {
        ChaosError::Faults(err) => err,
        other => panic!("expected fault error, got {other}"),
    };
    let failures = err.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].label, "restart router router-1");
    assert_eq!(failures[0].kind, "restart.router");
    assert_eq!(failures[0].attempts, 4);
    assert_eq!(control.ops_for("restart").len(), 6);
    assert_eq!(probe.calls(), 0);
}

/// Churn deletes, modifies and recreates entities while admins survive.
#[tokio::test(start_paused = true)]
async fn churn_runs_between_faults_and_validation() {
    let control = Arc::new(StubControl::new());
    let probe = Arc::new(ScriptedProbe::always(0));
    let edge = Arc::new(FakeEdge::new());
    for i in 0..10 {
        edge.insert(EntityType::Services, &format!("svc-{i}"), false);
        edge.insert(EntityType::Identities, &format!("id-{i}"), false);
        edge.insert(EntityType::ServicePolicies, &format!("policy-{i}"), false);
    }
    edge.insert(EntityType::Identities, "admin", true);

    let provider: Arc<dyn EdgeApi> = edge.clone();
    let churn = EntityChurn::new(
        Arc::new(provider),
        ChurnConfig {
            enabled: true,
            services: 3,
            identities: 3,
            service_policies: 3,
            concurrency: 2,
        },
        TaskScheduler::new(2, RetryPolicy::with_backoff_unit(Duration::from_secs(1))),
    );

    let mut faults = ChaosConfig::default();
    faults.routers.selection = SelectionStrategy::Fixed { count: 1 };
    let mut chaos = orchestrator(topology(3, 4, 0), faults, &control, &probe, 1).with_churn(churn);
    let report = chaos.run_iteration(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.churn.map(|s| s.succeeded), Some(27));
    assert_eq!(edge.count(EntityType::Services), 10);
    assert_eq!(edge.count(EntityType::Identities), 11);
    assert_eq!(edge.count(EntityType::ServicePolicies), 10);
    assert!(edge.names(EntityType::Identities).contains(&"admin".to_string()));
    // three created plus three renamed
    let churned = edge
        .names(EntityType::Services)
        .into_iter()
        .filter(|n| n.starts_with("chaos-service-"))
        .count();
    assert_eq!(churned, 6);
    assert_eq!(report.validations.len(), 1);
}

/// Restarted components must be running before validation starts.
#[tokio::test(start_paused = true)]
async fn up_check_runs_on_restarted_victims() {
    let control = Arc::new(StubControl::new());
    let probe = Arc::new(ScriptedProbe::always(0));
    let edge = Arc::new(FakeEdge::new());
    for i in 1..=4 {
        edge.insert_router(&format!("router-{i}"), i != 3);
    }
    let provider: Arc<dyn EdgeApi> = edge;
    let up = UpChecker::new(
        control.clone(),
        TaskScheduler::new(10, RetryPolicy::with_backoff_unit(Duration::from_secs(1))),
        Duration::from_secs(5),
    )
    .with_edge(Arc::new(provider), Arc::new(crate::up::IdCache::new()));

    let mut faults = ChaosConfig::default();
    faults.routers.selection = SelectionStrategy::Fixed { count: 4 };
    let mut chaos = orchestrator(topology(3, 4, 0), faults, &control, &probe, 1).with_up_checker(up);
    let err = chaos.run_iteration(&CancellationToken::new()).await.unwrap_err();

    let err = match err {
        ChaosError::NotUp(err) => err,
        other => panic!("expected up-check error, got {other}"),
    };
    let labels: Vec<_> = err.failures().iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels, ["check router-3 is up"]);
    assert_eq!(probe.calls(), 0);
}

/// Seven iterations disturb every combination of categories once.
#[tokio::test(start_paused = true)]
async fn seven_iterations_cover_all_scenarios() {
    let control = Arc::new(StubControl::new());
    let probe = Arc::new(ScriptedProbe::always(0));
    let mut faults = ChaosConfig::default();
    faults.controllers.selection = SelectionStrategy::Fixed { count: 1 };
    faults.routers.selection = SelectionStrategy::Fixed { count: 1 };
    faults.hosted_apps.selection = SelectionStrategy::Fixed { count: 1 };

    let mut chaos = orchestrator(topology(3, 5, 5), faults, &control, &probe, 4);
    let cancel = CancellationToken::new();
    let mut seen = HashSet::new();
    for _ in 0..7 {
        let report = chaos.run_iteration(&cancel).await.unwrap();
        assert_eq!(report.victim_count(), report.scenario.categories().len());
        seen.insert(report.scenario.bits());
    }
    assert_eq!(seen.len(), 7);
    assert_eq!(control.ops_for("restart").len(), 12);
}

/// Cancelling during fault injection surfaces as a cancellation.
#[tokio::test(start_paused = true)]
async fn cancel_during_faults() {
    let control = Arc::new(StubControl::new().with_delay(Duration::from_secs(30)));
    let probe = Arc::new(ScriptedProbe::always(0));
    let mut faults = ChaosConfig::default();
    faults.routers.selection = SelectionStrategy::Fixed { count: 4 };
    faults.routers.concurrency = 2;

    let mut chaos = orchestrator(topology(3, 4, 0), faults, &control, &probe, 1);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    let err = chaos.run_iteration(&cancel).await.unwrap_err();
    assert!(err.is_cancelled(), "unexpected error: {err}");
    assert_eq!(probe.calls(), 0);
}
