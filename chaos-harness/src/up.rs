//! Checks that components are up after chaos.
//!
//! Every component's lifecycle driver must report the process running. Routers
//! that have an edge-router record must also be reported online by the
//! controller. Each check is a `validate.up` task, so a component that is
//! still starting gets the scheduler's retries and backoff.

use std::sync::Arc;
use std::time::Duration;

use chaos_client::{EdgeApi, EntityType};
use chaos_core::TaskError;
use chaos_types::{Component, ComponentKind};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::edge::EdgeProvider;
use crate::lifecycle::{ComponentControl, Restartable};
use crate::scheduler::{ExecutionSummary, LabeledTask, SchedulerError, TaskScheduler};

/// Task kind of up checks.
pub const VALIDATE_UP_KIND: &str = "validate.up";

/// Component name to remote id, shared by concurrent tasks.
#[derive(Debug, Default)]
pub struct IdCache {
    ids: DashMap<(EntityType, String), String>,
}

impl IdCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote id of the `entity` named `name`, looked up once and cached.
    pub async fn resolve(&self, edge: &dyn EdgeApi, entity: EntityType, name: &str) -> Result<String, TaskError> {
        let key = (entity, name.to_string());
        let cached = self.ids.get(&key).map(|id| id.value().clone());
        if let Some(id) = cached {
            return Ok(id);
        }

        let filter = format!("name=\"{}\"", name);
        let id = edge
            .list(entity, &filter)
            .await?
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.id)
            .ok_or_else(|| TaskError::api("NOT_FOUND", &format!("{} {}", entity.singular(), name)))?;
        self.ids.insert(key, id.clone());
        Ok(id)
    }

    /// Drop a cached id, e.g. after the entity was deleted.
    pub fn forget(&self, entity: EntityType, name: &str) {
        self.ids.remove(&(entity, name.to_string()));
    }

    /// Number of cached ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Runs `validate.up` tasks.
pub struct UpChecker {
    control: Arc<dyn ComponentControl>,
    edge: Option<Arc<dyn EdgeProvider>>,
    ids: Arc<IdCache>,
    check_timeout: Duration,
    scheduler: TaskScheduler,
}

impl std::fmt::Debug for UpChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpChecker")
            .field("check_timeout", &self.check_timeout)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl UpChecker {
    /// Checker using `control` for process status, scheduled by `scheduler`.
    pub fn new(control: Arc<dyn ComponentControl>, scheduler: TaskScheduler, check_timeout: Duration) -> Self {
        Self {
            control,
            edge: None,
            ids: Arc::new(IdCache::new()),
            check_timeout,
            scheduler,
        }
    }

    /// Also check router online status through the edge API.
    pub fn with_edge(mut self, edge: Arc<dyn EdgeProvider>, ids: Arc<IdCache>) -> Self {
        self.edge = Some(edge);
        self.ids = ids;
        self
    }

    /// Check every component in `components`.
    pub async fn validate_up(
        &self,
        components: &[Component],
        cancel: &CancellationToken,
    ) -> Result<ExecutionSummary, SchedulerError> {
        let tasks = components.iter().map(|c| self.task(c)).collect();
        self.scheduler.execute(tasks, cancel).await
    }

    fn task(&self, component: &Component) -> LabeledTask {
        // Unmanaged components have no process to check
        let driver = self.control.lifecycle(component).ok();
        let edge = match component.kind {
            ComponentKind::Router => self.edge.clone(),
            _ => None,
        };
        let ids = Arc::clone(&self.ids);
        let check_timeout = self.check_timeout;
        let id = component.id.clone();

        LabeledTask::new(VALIDATE_UP_KIND, format!("check {} is up", component.id), move || {
            let driver = driver.clone();
            let edge = edge.clone();
            let ids = Arc::clone(&ids);
            let id = id.clone();
            async move {
                if let Some(driver) = driver {
                    check_running(driver.as_ref(), check_timeout).await?;
                }
                if let Some(edge) = edge {
                    check_online(edge.as_ref(), &ids, &id).await?;
                }
                Ok(())
            }
        })
    }
}

async fn check_running(driver: &dyn Restartable, check_timeout: Duration) -> Result<(), TaskError> {
    let running = tokio::time::timeout(check_timeout, driver.is_running())
        .await
        .map_err(|_| TaskError::Timeout(format!("{} status check after {:?}", driver.id(), check_timeout)))??;
    if !running {
        return Err(TaskError::other(format!("{} is not running", driver.id())));
    }
    Ok(())
}

async fn check_online(edge: &dyn EdgeProvider, ids: &IdCache, name: &str) -> Result<(), TaskError> {
    let api = edge.edge().await?;
    let id = match ids.resolve(api.as_ref(), EntityType::EdgeRouters, name).await {
        Ok(id) => id,
        // Fabric-only router without an edge record
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };
    let router = api.get(EntityType::EdgeRouters, &id).await?;
    if router.is_online != Some(true) {
        return Err(TaskError::other(format!("edge router {} is not online", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{router, FakeEdge, StubControl};
    use chaos_core::RetryPolicy;

    fn checker(control: Arc<StubControl>) -> UpChecker {
        UpChecker::new(
            control,
            TaskScheduler::new(10, RetryPolicy::with_backoff_unit(Duration::from_secs(1))),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn running_components_pass() {
        let control = Arc::new(StubControl::new());
        let components: Vec<_> = (1..=4).map(router).collect();
        let summary = checker(control.clone())
            .validate_up(&components, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_component_is_reported() {
        let control = Arc::new(StubControl::new());
        control.set_running("router-2", false);
        let components: Vec<_> = (1..=3).map(router).collect();

        let err = checker(control)
            .validate_up(&components, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].label, "check router-2 is up");
    }

    #[tokio::test(start_paused = true)]
    async fn hung_status_check_times_out() {
        let control = Arc::new(StubControl::new().with_status_delay(Duration::from_secs(60)));
        let components = vec![router(1)];

        let err = checker(control)
            .validate_up(&components, &CancellationToken::new())
            .await
            .unwrap_err();
        let failure = &err.failures()[0];
        assert_eq!(failure.attempts, 4);
        assert_eq!(
            failure.error,
            TaskError::Timeout("router-1 status check after 5s".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn offline_router_is_reported() {
        let edge = Arc::new(FakeEdge::new());
        edge.insert_router("router-1", true);
        edge.insert_router("router-2", false);
        let provider: Arc<dyn EdgeApi> = edge;
        let components: Vec<_> = (1..=3).map(router).collect();

        let err = checker(Arc::new(StubControl::new()))
            .with_edge(Arc::new(provider), Arc::new(IdCache::new()))
            .validate_up(&components, &CancellationToken::new())
            .await
            .unwrap_err();

        let labels: Vec<_> = err.failures().iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, ["check router-2 is up"]);
    }

    #[tokio::test]
    async fn id_cache_lists_once() {
        let edge = FakeEdge::new();
        edge.insert_router("router-1", true);
        let cache = IdCache::new();

        let first = cache.resolve(&edge, EntityType::EdgeRouters, "router-1").await.unwrap();
        let second = cache.resolve(&edge, EntityType::EdgeRouters, "router-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(edge.list_calls(), 1);

        let missing = cache.resolve(&edge, EntityType::EdgeRouters, "router-9").await.unwrap_err();
        assert!(missing.is_not_found());
    }
}
