//! Entity churn: deletes, modifies and recreates edge entities during chaos.
//!
//! Each enabled entity type gets `count` deletions of random existing
//! entities, `count` modifications of other existing entities (new name and
//! roles) and `count` creations of new ones with random role attributes.
//! Task kinds are `delete.<entity>`, `modify.<entity>` and `create.<entity>`,
//! so an entity that is already gone, or a create that landed before its
//! reply was lost, is not a failure.

use std::collections::BTreeSet;
use std::sync::Arc;

use chaos_client::{EntityType, LIMIT_NONE};
use chaos_core::{TaskError, CREATE_PREFIX, DELETE_PREFIX};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::edge::EdgeProvider;
use crate::scheduler::{ExecutionSummary, LabeledTask, SchedulerError, TaskScheduler};

/// Upper bound on role attributes given to a new entity.
const MAX_ROLE_ATTRIBUTES: usize = 3;

/// Distinct role attribute values to draw from.
const ROLE_POOL: u32 = 10;

/// Kind prefix of tasks that rename and re-role an existing entity.
pub const MODIFY_PREFIX: &str = "modify.";

/// Churn errors.
#[derive(Debug, Error)]
pub enum ChurnError {
    /// Existing entities could not be listed.
    #[error("listing {entity} failed: {source}")]
    List {
        /// Entity collection.
        entity: &'static str,
        /// Underlying error.
        #[source]
        source: TaskError,
    },

    /// Some churn tasks failed.
    #[error(transparent)]
    Tasks(#[from] SchedulerError),
}

/// Churn settings (`[churn]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChurnConfig {
    /// Churn entities each iteration.
    #[serde(default)]
    pub enabled: bool,

    /// Services deleted, modified and created per iteration.
    #[serde(default = "default_churn_count")]
    pub services: usize,

    /// Non-admin identities deleted, modified and created per iteration.
    #[serde(default = "default_churn_count")]
    pub identities: usize,

    /// Service policies deleted, modified and created per iteration.
    #[serde(default = "default_churn_count")]
    pub service_policies: usize,

    /// Concurrent churn tasks.
    #[serde(default = "default_churn_concurrency")]
    pub concurrency: usize,
}

fn default_churn_count() -> usize {
    5
}

fn default_churn_concurrency() -> usize {
    2
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            services: default_churn_count(),
            identities: default_churn_count(),
            service_policies: default_churn_count(),
            concurrency: default_churn_concurrency(),
        }
    }
}

impl ChurnConfig {
    fn counts(&self) -> [(EntityType, usize); 3] {
        [
            (EntityType::Services, self.services),
            (EntityType::Identities, self.identities),
            (EntityType::ServicePolicies, self.service_policies),
        ]
    }
}

/// Builds and runs churn tasks against the edge API.
pub struct EntityChurn {
    edge: Arc<dyn EdgeProvider>,
    config: ChurnConfig,
    scheduler: TaskScheduler,
}

impl std::fmt::Debug for EntityChurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityChurn")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl EntityChurn {
    /// Churn through `edge`, scheduled by `scheduler`.
    pub fn new(edge: Arc<dyn EdgeProvider>, config: ChurnConfig, scheduler: TaskScheduler) -> Self {
        Self {
            edge,
            config,
            scheduler,
        }
    }

    /// Delete, modify and create tasks for every entity type, shuffled.
    ///
    /// Deleted and modified entities are disjoint. With fewer than `2 * count`
    /// existing entities, deletions are filled first.
    pub async fn tasks<R: Rng + Send + ?Sized>(&self, rng: &mut R) -> Result<Vec<LabeledTask>, ChurnError> {
        let mut tasks = Vec::new();
        for (entity, count) in self.config.counts() {
            if count == 0 {
                continue;
            }
            let existing = self.candidates(entity).await?;
            let mut deleted: Vec<String> = existing.choose_multiple(rng, count * 2).cloned().collect();
            let modified = deleted.split_off(count.min(deleted.len()));
            tracing::debug!(
                entity = entity.path(),
                existing = existing.len(),
                deleting = deleted.len(),
                modifying = modified.len(),
                "churn"
            );

            tasks.extend(deleted.into_iter().map(|id| self.delete_task(entity, id)));
            for id in modified {
                let body = modified_entity(entity, rng);
                tasks.push(self.modify_task(entity, id, body));
            }
            tasks.extend((0..count).map(|_| self.create_task(entity, new_entity(entity, rng))));
        }
        tasks.shuffle(rng);
        Ok(tasks)
    }

    /// Build and run one round of churn.
    pub async fn run<R: Rng + Send + ?Sized>(
        &self,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> Result<ExecutionSummary, ChurnError> {
        let tasks = self.tasks(rng).await?;
        tracing::info!(tasks = tasks.len(), "churning entities");
        Ok(self.scheduler.execute(tasks, cancel).await?)
    }

    async fn candidates(&self, entity: EntityType) -> Result<Vec<String>, ChurnError> {
        let list_error = |source| ChurnError::List {
            entity: entity.path(),
            source,
        };
        let api = self.edge.edge().await.map_err(list_error)?;
        let filter = match entity {
            EntityType::Identities => format!("not isAdmin {}", LIMIT_NONE),
            _ => LIMIT_NONE.to_string(),
        };
        let entities = api
            .list(entity, &filter)
            .await
            .map_err(|e| list_error(e.into()))?;
        Ok(entities
            .into_iter()
            .filter(|e| e.is_admin != Some(true))
            .map(|e| e.id)
            .collect())
    }

    fn delete_task(&self, entity: EntityType, id: String) -> LabeledTask {
        let edge = Arc::clone(&self.edge);
        let kind = format!("{}{}", DELETE_PREFIX, entity.singular());
        let label = format!("delete {} {}", entity.singular(), id);
        LabeledTask::new(kind, label, move || {
            let edge = Arc::clone(&edge);
            let id = id.clone();
            async move {
                edge.edge().await?.delete(entity, &id).await?;
                Ok(())
            }
        })
    }

    fn modify_task(&self, entity: EntityType, id: String, body: Value) -> LabeledTask {
        let edge = Arc::clone(&self.edge);
        let kind = format!("{}{}", MODIFY_PREFIX, entity.singular());
        let label = format!("modify {} {}", entity.singular(), id);
        let body = Arc::new(body);
        LabeledTask::new(kind, label, move || {
            let edge = Arc::clone(&edge);
            let id = id.clone();
            let body = Arc::clone(&body);
            async move {
                edge.edge().await?.update(entity, &id, &body).await?;
                Ok(())
            }
        })
    }

    fn create_task(&self, entity: EntityType, body: Value) -> LabeledTask {
        let edge = Arc::clone(&self.edge);
        let kind = format!("{}{}", CREATE_PREFIX, entity.singular());
        let label = format!("create {} {}", entity.singular(), body["name"].as_str().unwrap_or_default());
        let body = Arc::new(body);
        LabeledTask::new(kind, label, move || {
            let edge = Arc::clone(&edge);
            let body = Arc::clone(&body);
            async move {
                edge.edge().await?.create(entity, &body).await?;
                Ok(())
            }
        })
    }
}

/// `role-N` attributes, one to three of them.
fn role_attributes<R: Rng + ?Sized>(rng: &mut R) -> Vec<String> {
    let count = rng.gen_range(1..=MAX_ROLE_ATTRIBUTES);
    (0..count)
        .map(|_| format!("role-{}", rng.gen_range(0..ROLE_POOL)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Role attributes in `#attr` form, as policies reference them.
fn roles<R: Rng + ?Sized>(rng: &mut R) -> Vec<String> {
    role_attributes(rng).into_iter().map(|r| format!("#{}", r)).collect()
}

fn unique_name(entity: EntityType) -> String {
    format!("chaos-{}-{}", entity.singular(), uuid::Uuid::new_v4())
}

/// Create body for a new entity with a unique name.
fn new_entity<R: Rng + ?Sized>(entity: EntityType, rng: &mut R) -> Value {
    let name = unique_name(entity);
    match entity {
        EntityType::Identities => json!({
            "name": name,
            "type": "Default",
            "isAdmin": false,
            "roleAttributes": role_attributes(rng),
        }),
        EntityType::ServicePolicies => {
            let policy_type = if rng.gen_bool(0.5) { "Dial" } else { "Bind" };
            json!({
                "name": name,
                "type": policy_type,
                "semantic": "AnyOf",
                "identityRoles": roles(rng),
                "serviceRoles": roles(rng),
                "postureCheckRoles": roles(rng),
            })
        }
        _ => {
            let encryption_required = rng.gen_bool(0.5);
            json!({
                "name": name,
                "encryptionRequired": encryption_required,
                "terminatorStrategy": "smartrouting",
                "roleAttributes": role_attributes(rng),
            })
        }
    }
}

/// Patch body giving an existing entity a new name and new roles.
fn modified_entity<R: Rng + ?Sized>(entity: EntityType, rng: &mut R) -> Value {
    let name = unique_name(entity);
    match entity {
        EntityType::ServicePolicies => json!({
            "name": name,
            "identityRoles": roles(rng),
            "serviceRoles": roles(rng),
            "postureCheckRoles": roles(rng),
        }),
        _ => json!({
            "name": name,
            "roleAttributes": role_attributes(rng),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEdge;
    use chaos_client::EdgeApi;
    use chaos_core::RetryPolicy;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn churn(edge: Arc<FakeEdge>, config: ChurnConfig) -> EntityChurn {
        let provider: Arc<dyn EdgeApi> = edge;
        EntityChurn::new(
            Arc::new(provider),
            config,
            TaskScheduler::new(2, RetryPolicy::with_backoff_unit(Duration::from_secs(10))),
        )
    }

    fn seeded_edge() -> Arc<FakeEdge> {
        let edge = Arc::new(FakeEdge::new());
        for i in 0..8 {
            edge.insert(EntityType::Services, &format!("svc-{}", i), false);
            edge.insert(EntityType::Identities, &format!("id-{}", i), false);
            edge.insert(EntityType::ServicePolicies, &format!("sp-{}", i), false);
        }
        edge.insert(EntityType::Identities, "admin", true);
        edge
    }

    fn labelled_ids(tasks: &[LabeledTask], prefix: &str) -> BTreeSet<String> {
        tasks
            .iter()
            .filter_map(|t| t.label.strip_prefix(prefix))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn role_attributes_are_distinct_and_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let attrs = role_attributes(&mut rng);
            assert!((1..=MAX_ROLE_ATTRIBUTES).contains(&attrs.len()));
            let unique: BTreeSet<_> = attrs.iter().collect();
            assert_eq!(unique.len(), attrs.len());
            assert!(attrs.iter().all(|a| a.starts_with("role-")));
        }
    }

    #[test]
    fn policy_body_references_roles() {
        let mut rng = StdRng::seed_from_u64(5);
        let body = new_entity(EntityType::ServicePolicies, &mut rng);
        assert_eq!(body["semantic"], "AnyOf");
        assert!(matches!(body["type"].as_str(), Some("Dial") | Some("Bind")));
        assert!(body["identityRoles"][0].as_str().unwrap().starts_with("#role-"));
    }

    #[tokio::test]
    async fn task_kinds_drive_retry_rules() {
        let edge = seeded_edge();
        let config = ChurnConfig {
            enabled: true,
            services: 2,
            identities: 0,
            service_policies: 1,
            concurrency: 2,
        };
        let tasks = churn(edge, config).tasks(&mut StdRng::seed_from_u64(1)).await.unwrap();

        let mut kinds: Vec<_> = tasks.iter().map(|t| t.kind.as_str()).collect();
        kinds.sort_unstable();
        assert_eq!(
            kinds,
            [
                "create.service",
                "create.service",
                "create.service-policy",
                "delete.service",
                "delete.service",
                "delete.service-policy",
                "modify.service",
                "modify.service",
                "modify.service-policy",
            ]
        );

        let deleted: BTreeSet<_> = labelled_ids(&tasks, "delete service ");
        let modified: BTreeSet<_> = labelled_ids(&tasks, "modify service ");
        assert_eq!(modified.len(), 2);
        assert!(deleted.is_disjoint(&modified));
    }

    #[test]
    fn modify_bodies_rename_and_re_role() {
        let mut rng = StdRng::seed_from_u64(8);
        let policy = modified_entity(EntityType::ServicePolicies, &mut rng);
        assert!(policy["name"].as_str().unwrap().starts_with("chaos-service-policy-"));
        assert!(policy["serviceRoles"][0].as_str().unwrap().starts_with("#role-"));
        assert!(policy.get("roleAttributes").is_none());
        assert!(policy.get("type").is_none());

        let identity = modified_entity(EntityType::Identities, &mut rng);
        assert!(identity["roleAttributes"][0].as_str().unwrap().starts_with("role-"));
        assert!(identity.get("isAdmin").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn modify_renames_in_place() {
        let edge = Arc::new(FakeEdge::new());
        let first = edge.insert(EntityType::Services, "svc-a", false);
        let second = edge.insert(EntityType::Services, "svc-b", false);
        let config = ChurnConfig {
            enabled: true,
            services: 1,
            identities: 0,
            service_policies: 0,
            concurrency: 1,
        };
        let summary = churn(edge.clone(), config)
            .run(&mut StdRng::seed_from_u64(4), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 3);

        // One original survives under its old id with a churned name
        let ids = edge.ids(EntityType::Services);
        let survivor = if ids.contains(&first) { &first } else { &second };
        let renamed = edge.get(EntityType::Services, survivor).await.unwrap();
        assert!(renamed.name.starts_with("chaos-service-"));
        assert!(renamed.role_attributes.is_some());
        assert_eq!(edge.count(EntityType::Services), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn churn_replaces_entities_and_spares_admins() {
        let edge = seeded_edge();
        let config = ChurnConfig {
            enabled: true,
            services: 5,
            identities: 8,
            service_policies: 5,
            concurrency: 2,
        };
        let summary = churn(edge.clone(), config)
            .run(&mut StdRng::seed_from_u64(9), &CancellationToken::new())
            .await
            .unwrap();

        // 5 + 3 + 5 services, 8 + 0 + 8 identities, 5 + 3 + 5 policies
        assert_eq!(summary.succeeded, 42);
        assert_eq!(edge.count(EntityType::Services), 8);
        assert!(edge
            .names(EntityType::Services)
            .iter()
            .all(|n| n.starts_with("chaos-service-")));
        assert_eq!(edge.count(EntityType::ServicePolicies), 8);
        assert_eq!(edge.count(EntityType::Identities), 9);
        assert!(edge.names(EntityType::Identities).contains(&"admin".to_string()));
        assert!(!edge.names(EntityType::Identities).contains(&"id-0".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn already_deleted_entity_is_ignored() {
        let edge = seeded_edge();
        let config = ChurnConfig {
            enabled: true,
            services: 1,
            identities: 0,
            service_policies: 0,
            concurrency: 1,
        };
        let churn = churn(edge.clone(), config);
        let tasks = churn.tasks(&mut StdRng::seed_from_u64(2)).await.unwrap();

        // Someone else removes the victim first
        for id in labelled_ids(&tasks, "delete service ") {
            edge.delete(EntityType::Services, &id).await.unwrap();
        }

        let summary = churn.scheduler.execute(tasks, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.ignored, 1);
        assert_eq!(summary.succeeded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn modify_of_vanished_entity_is_reported() {
        let edge = seeded_edge();
        let config = ChurnConfig {
            enabled: true,
            services: 1,
            identities: 0,
            service_policies: 0,
            concurrency: 1,
        };
        let churn = churn(edge.clone(), config);
        let tasks = churn.tasks(&mut StdRng::seed_from_u64(6)).await.unwrap();

        for id in edge.ids(EntityType::Services) {
            edge.delete(EntityType::Services, &id).await.unwrap();
        }

        let err = churn
            .scheduler
            .execute(tasks, &CancellationToken::new())
            .await
            .unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, "modify.service");
        assert_eq!(failures[0].attempts, 4);
        assert!(failures[0].error.is_not_found());
    }
}
