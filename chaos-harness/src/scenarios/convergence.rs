//! Convergence polling against scripted controllers.

use std::sync::Arc;
use std::time::Duration;

use chaos_types::{ValidationKind, ValidationRequest};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterValidator;
use crate::convergence::{ConvergenceError, ConvergencePoller};
use crate::testing::{controller_sessions, ScriptedProbe};

fn request() -> ValidationRequest {
    ValidationRequest::new(ValidationKind::RouterDataModel)
}

/// Five inconsistencies until the third attempt, then clean.
#[tokio::test(start_paused = true)]
async fn poller_retries_until_clean() {
    let probe = Arc::new(ScriptedProbe::clean_after(3, 5));
    let poller = ConvergencePoller::new(probe.clone()).with_retry_interval(Duration::from_secs(15));
    let session = controller_sessions(1).remove(0);

    let started = Instant::now();
    let convergence = poller
        .poll(
            &session,
            &request(),
            Instant::now() + Duration::from_secs(900),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(probe.calls(), 3);
    assert_eq!(convergence.attempts, 3);
    assert_eq!(convergence.report.invalid, 0);
    assert_eq!(started.elapsed(), Duration::from_secs(30));
}

/// A deadline shorter than the retry interval allows exactly one attempt.
#[tokio::test(start_paused = true)]
async fn short_deadline_allows_one_attempt() {
    let probe = Arc::new(ScriptedProbe::always(2));
    let poller = ConvergencePoller::new(probe.clone()).with_retry_interval(Duration::from_secs(15));
    let session = controller_sessions(1).remove(0);

    let started = Instant::now();
    let err = poller
        .poll(
            &session,
            &request(),
            Instant::now() + Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(probe.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(15));
    match err {
        ConvergenceError::DeadlineExceeded {
            attempts, last_invalid, ..
        } => {
            assert_eq!(attempts, 1);
            assert_eq!(last_invalid, Some(2));
        }
        other => panic!("expected deadline error, got {other}"),
    }
}

/// One stuck controller fails the cluster; the others still finish.
#[tokio::test(start_paused = true)]
async fn stuck_controller_fails_cluster() {
    let probe = Arc::new(ScriptedProbe::new(|ctrl, _| if ctrl == "ctrl2" { 4 } else { 0 }));
    let poller = ConvergencePoller::new(probe.clone()).with_retry_interval(Duration::from_secs(15));
    let validator = ClusterValidator::new(poller, controller_sessions(3), Duration::from_secs(60));

    let err = validator
        .validate(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.controller(), "ctrl2");
    assert!(matches!(err, ConvergenceError::DeadlineExceeded { attempts: 4, .. }));
    assert_eq!(probe.calls_for("ctrl1"), 1);
    assert_eq!(probe.calls_for("ctrl3"), 1);
    assert_eq!(probe.calls_for("ctrl2"), 4);
}

/// Every controller converges on its own schedule.
#[tokio::test(start_paused = true)]
async fn controllers_converge_independently() {
    let probe = Arc::new(ScriptedProbe::new(|ctrl, call| match ctrl {
        "ctrl1" => 0,
        "ctrl2" if call < 2 => 3,
        "ctrl3" if call < 4 => 1,
        _ => 0,
    }));
    let poller = ConvergencePoller::new(probe.clone()).with_retry_interval(Duration::from_secs(15));
    let validator = ClusterValidator::new(poller, controller_sessions(3), Duration::from_secs(900));

    let results = validator.validate(&request(), &CancellationToken::new()).await.unwrap();

    let attempts: Vec<_> = results.iter().map(|c| (c.controller.as_str(), c.attempts)).collect();
    assert_eq!(attempts, [("ctrl1", 1), ("ctrl2", 2), ("ctrl3", 4)]);
}

/// Cancelling mid-poll stops every controller promptly.
#[tokio::test(start_paused = true)]
async fn cancel_stops_cluster_validation() {
    let probe = Arc::new(ScriptedProbe::always(1));
    let poller = ConvergencePoller::new(probe.clone()).with_retry_interval(Duration::from_secs(15));
    let validator = ClusterValidator::new(poller, controller_sessions(3), Duration::from_secs(900));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(20)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = validator.validate(&request(), &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(probe.calls(), 6);
}
