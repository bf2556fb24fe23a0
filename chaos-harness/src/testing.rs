//! Test doubles for the harness: scripted validation, stub lifecycle control,
//! an in-memory edge API and topology builders.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chaos_client::{
    ApiSession, ControllerSession, EdgeApi, EntitySummary, EntityType, RestError, StaticAuthenticator,
    ValidationError, ValidationReport,
};
use chaos_core::TaskError;
use chaos_types::{Component, ComponentKind, Host, Topology, ValidationRequest};
use tokio_util::sync::CancellationToken;

use crate::convergence::ValidationProbe;
use crate::lifecycle::{ComponentControl, Restartable};

fn host(id: &str, n: usize) -> Host {
    Host {
        id: format!("{}-host", id),
        address: format!("10.0.{}.{}", n / 250, n % 250 + 1),
        user: "ubuntu".into(),
    }
}

/// Controller `ctrl{n}` with edge and management endpoints.
pub fn controller(n: usize) -> Component {
    let id = format!("ctrl{}", n);
    let component = Component::new(&id, ComponentKind::Controller, host(&id, n));
    let address = component.host.address.clone();
    component.with_endpoints(&format!("https://{}:1280", address), &format!("{}:6262", address))
}

/// Router `router-{n}`.
pub fn router(n: usize) -> Component {
    let id = format!("router-{}", n);
    Component::new(&id, ComponentKind::Router, host(&id, n))
}

/// Hosted app `app-{n}`.
pub fn hosted_app(n: usize) -> Component {
    let id = format!("app-{}", n);
    Component::new(&id, ComponentKind::HostedApp, host(&id, n))
}

/// Topology of `ctrls` controllers, `routers` routers and `apps` hosted apps.
pub fn topology(ctrls: usize, routers: usize, apps: usize) -> Topology {
    let components = (1..=ctrls)
        .map(controller)
        .chain((1..=routers).map(router))
        .chain((1..=apps).map(hosted_app))
        .collect();
    Topology::new(components).unwrap()
}

/// Sessions for `ctrl1..=ctrlN` backed by a [`StaticAuthenticator`].
pub fn controller_sessions(n: usize) -> Vec<Arc<ControllerSession>> {
    let auth = Arc::new(StaticAuthenticator::new());
    (1..=n)
        .map(|i| Arc::new(ControllerSession::new(controller(i), auth.clone())))
        .collect()
}

type Script = Box<dyn Fn(&str, u32) -> u64 + Send + Sync>;

/// Probe whose invalid count is a function of (controller, call number).
pub struct ScriptedProbe {
    script: Script,
    calls: Mutex<HashMap<String, u32>>,
    total: AtomicU32,
}

impl ScriptedProbe {
    /// Probe driven by `script(controller, call)`, calls counted from 1.
    pub fn new(script: impl Fn(&str, u32) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(HashMap::new()),
            total: AtomicU32::new(0),
        }
    }

    /// Always reports `invalid` inconsistencies.
    pub fn always(invalid: u64) -> Self {
        Self::new(move |_, _| invalid)
    }

    /// Reports `invalid` until call `n` of each controller, then clean.
    pub fn clean_after(n: u32, invalid: u64) -> Self {
        Self::new(move |_, call| if call >= n { 0 } else { invalid })
    }

    /// Total calls.
    pub fn calls(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }

    /// Calls for one controller.
    pub fn calls_for(&self, controller: &str) -> u32 {
        self.calls.lock().unwrap().get(controller).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ValidationProbe for ScriptedProbe {
    async fn validate(
        &self,
        session: &ApiSession,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, ValidationError> {
        let controller = session.controller_id.clone();
        if cancel.is_cancelled() {
            return Err(ValidationError::Cancelled { controller });
        }
        self.total.fetch_add(1, Ordering::SeqCst);
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(controller.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let invalid = (self.script)(&controller, call);
        Ok(ValidationReport {
            controller,
            kind: request.kind,
            expected: invalid + 3,
            invalid,
            failures: Vec::new(),
        })
    }
}

#[derive(Default)]
struct StubState {
    ops: Mutex<Vec<(String, String)>>,
    stopped: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    unsupported: Mutex<HashSet<String>>,
    running_now: AtomicUsize,
    peak: AtomicUsize,
}

/// Lifecycle control that records operations instead of running them.
#[derive(Default, Clone)]
pub struct StubControl {
    state: Arc<StubState>,
    delay: Duration,
    status_delay: Duration,
}

impl StubControl {
    /// Control where every component is running and every operation succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Each operation takes `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Each status check takes `delay`.
    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    /// Mark a component running or stopped.
    pub fn set_running(&self, id: &str, running: bool) {
        let mut stopped = self.state.stopped.lock().unwrap();
        if running {
            stopped.remove(id);
        } else {
            stopped.insert(id.to_string());
        }
    }

    /// Every operation on `id` fails.
    pub fn fail(&self, id: &str) {
        self.state.failing.lock().unwrap().insert(id.to_string());
    }

    /// `id` has no lifecycle driver.
    pub fn unsupported(&self, id: &str) {
        self.state.unsupported.lock().unwrap().insert(id.to_string());
    }

    /// Recorded `(operation, component)` pairs.
    pub fn ops(&self) -> Vec<(String, String)> {
        self.state.ops.lock().unwrap().clone()
    }

    /// Components an operation was applied to, sorted.
    pub fn ops_for(&self, op: &str) -> Vec<String> {
        let mut ids: Vec<_> = self
            .ops()
            .into_iter()
            .filter(|(o, _)| o == op)
            .map(|(_, id)| id)
            .collect();
        ids.sort();
        ids
    }

    /// Highest number of operations in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Whether `id` is currently running.
    pub fn is_running(&self, id: &str) -> bool {
        !self.state.stopped.lock().unwrap().contains(id)
    }
}

impl ComponentControl for StubControl {
    fn lifecycle(&self, component: &Component) -> Result<Arc<dyn Restartable>, TaskError> {
        if self.state.unsupported.lock().unwrap().contains(&component.id) {
            return Err(TaskError::Unsupported {
                component: component.id.clone(),
                operation: "lifecycle",
            });
        }
        Ok(Arc::new(StubProcess {
            id: component.id.clone(),
            control: self.clone(),
        }))
    }
}

struct StubProcess {
    id: String,
    control: StubControl,
}

impl StubProcess {
    async fn record(&self, op: &str) -> Result<(), TaskError> {
        let state = &self.control.state;
        let now = state.running_now.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(now, Ordering::SeqCst);
        if !self.control.delay.is_zero() {
            tokio::time::sleep(self.control.delay).await;
        }
        state.running_now.fetch_sub(1, Ordering::SeqCst);

        state.ops.lock().unwrap().push((op.to_string(), self.id.clone()));
        if state.failing.lock().unwrap().contains(&self.id) {
            return Err(TaskError::other(format!("{} {} failed", op, self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl Restartable for StubProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), TaskError> {
        self.record("start").await?;
        self.control.set_running(&self.id, true);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TaskError> {
        self.record("stop").await?;
        self.control.set_running(&self.id, false);
        Ok(())
    }

    async fn restart(&self) -> Result<(), TaskError> {
        self.record("restart").await?;
        self.control.set_running(&self.id, true);
        Ok(())
    }

    async fn is_running(&self) -> Result<bool, TaskError> {
        if !self.control.status_delay.is_zero() {
            tokio::time::sleep(self.control.status_delay).await;
        }
        Ok(self.control.is_running(&self.id))
    }
}

/// In-memory edge API.
#[derive(Default)]
pub struct FakeEdge {
    entities: Mutex<HashMap<EntityType, Vec<EntitySummary>>>,
    next_id: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeEdge {
    /// Empty edge API.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, entity: EntityType) -> String {
        format!("{}-{}", entity.singular(), self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Add an entity named `name`; returns its id.
    pub fn insert(&self, entity: EntityType, name: &str, is_admin: bool) -> String {
        let id = self.next_id(entity);
        self.entities.lock().unwrap().entry(entity).or_default().push(EntitySummary {
            id: id.clone(),
            name: name.to_string(),
            is_online: None,
            is_admin: Some(is_admin),
            role_attributes: None,
        });
        id
    }

    /// Add an edge router; returns its id.
    pub fn insert_router(&self, name: &str, online: bool) -> String {
        let id = self.next_id(EntityType::EdgeRouters);
        self.entities
            .lock()
            .unwrap()
            .entry(EntityType::EdgeRouters)
            .or_default()
            .push(EntitySummary {
                id: id.clone(),
                name: name.to_string(),
                is_online: Some(online),
                is_admin: None,
                role_attributes: None,
            });
        id
    }

    fn all(&self, entity: EntityType) -> Vec<EntitySummary> {
        self.entities.lock().unwrap().get(&entity).cloned().unwrap_or_default()
    }

    /// Number of entities of a type.
    pub fn count(&self, entity: EntityType) -> usize {
        self.all(entity).len()
    }

    /// Names of entities of a type.
    pub fn names(&self, entity: EntityType) -> Vec<String> {
        self.all(entity).into_iter().map(|e| e.name).collect()
    }

    /// Ids of entities of a type.
    pub fn ids(&self, entity: EntityType) -> Vec<String> {
        self.all(entity).into_iter().map(|e| e.id).collect()
    }

    /// Number of list calls served.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EdgeApi for FakeEdge {
    async fn list(&self, entity: EntityType, filter: &str) -> Result<Vec<EntitySummary>, RestError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let name = filter.strip_prefix("name=\"").and_then(|rest| rest.strip_suffix('"'));
        Ok(self
            .all(entity)
            .into_iter()
            .filter(|e| name.map_or(true, |n| e.name == n))
            .collect())
    }

    async fn get(&self, entity: EntityType, id: &str) -> Result<EntitySummary, RestError> {
        self.all(entity)
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| RestError::NotFound(id.to_string()))
    }

    async fn create(&self, entity: EntityType, body: &serde_json::Value) -> Result<String, RestError> {
        let name = body["name"].as_str().unwrap_or_default().to_string();
        if self.names(entity).contains(&name) {
            return Err(RestError::Api {
                status: 400,
                code: "COULD_NOT_VALIDATE".into(),
                message: format!("name {} is already in use", name),
            });
        }
        let is_admin = body["isAdmin"].as_bool().unwrap_or(false);
        Ok(self.insert(entity, &name, is_admin))
    }

    async fn update(&self, entity: EntityType, id: &str, body: &serde_json::Value) -> Result<(), RestError> {
        let name = body["name"].as_str().map(str::to_string);
        let mut entities = self.entities.lock().unwrap();
        let list = entities.entry(entity).or_default();
        if let Some(name) = &name {
            if list.iter().any(|e| &e.name == name && e.id != id) {
                return Err(RestError::Api {
                    status: 400,
                    code: "COULD_NOT_VALIDATE".into(),
                    message: format!("name {} is already in use", name),
                });
            }
        }
        let target = list
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| RestError::NotFound(id.to_string()))?;
        if let Some(name) = name {
            target.name = name;
        }
        if let Some(attrs) = body["roleAttributes"].as_array() {
            target.role_attributes = Some(attrs.iter().filter_map(|a| a.as_str().map(str::to_string)).collect());
        }
        Ok(())
    }

    async fn delete(&self, entity: EntityType, id: &str) -> Result<(), RestError> {
        let mut entities = self.entities.lock().unwrap();
        let list = entities.entry(entity).or_default();
        let before = list.len();
        list.retain(|e| e.id != id);
        if list.len() == before {
            return Err(RestError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
