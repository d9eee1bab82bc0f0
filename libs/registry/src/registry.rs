//! The registry facade bundling the typed stores.

use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use verdant_core::{CloudProfile, ObjectKey, Project, Seed, Shoot};

use crate::admission::{AdmissionPlugin, Operation};
use crate::error::RegistryError;
use crate::events::{EventRecord, EventType};
use crate::object::StoredObject;
use crate::store::{Store, WatchEvent};

/// The store of record for shoots, seeds, cloud profiles, and projects.
///
/// Shoot writes pass through the configured admission plugin before they
/// commit; the other kinds are exposed directly through their stores.
pub struct Registry {
    shoots: Store<Shoot>,
    seeds: Store<Seed>,
    cloud_profiles: Store<CloudProfile>,
    projects: Store<Project>,
    events: Mutex<Vec<EventRecord>>,
    admission: RwLock<Option<Arc<dyn AdmissionPlugin>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            shoots: Store::new(),
            seeds: Store::new(),
            cloud_profiles: Store::new(),
            projects: Store::new(),
            events: Mutex::new(Vec::new()),
            admission: RwLock::new(None),
        }
    }

    /// Install the shoot admission plugin. Writes performed before this is
    /// called are not gated; wire admission before serving traffic.
    pub fn set_shoot_admission(&self, plugin: Arc<dyn AdmissionPlugin>) {
        *self.admission.write().expect("admission lock poisoned") = Some(plugin);
    }

    fn shoot_admission(&self) -> Option<Arc<dyn AdmissionPlugin>> {
        self.admission
            .read()
            .expect("admission lock poisoned")
            .clone()
    }

    // -------------------------------------------------------------------------
    // Shoots (admission-gated)
    // -------------------------------------------------------------------------

    pub fn list_shoots(&self) -> Vec<Shoot> {
        self.shoots.list()
    }

    pub fn get_shoot(&self, key: &ObjectKey) -> Result<Shoot, RegistryError> {
        self.shoots.get(key)
    }

    pub fn watch_shoots(&self) -> broadcast::Receiver<WatchEvent<Shoot>> {
        self.shoots.watch()
    }

    pub async fn create_shoot(&self, shoot: Shoot) -> Result<Shoot, RegistryError> {
        let shoot = match self.shoot_admission() {
            Some(plugin) => match plugin.review(Operation::Create, &shoot, None).await? {
                Some(mutated) => mutated,
                None => shoot,
            },
            None => shoot,
        };
        self.shoots.create(shoot)
    }

    /// Optimistic update: the caller's generation must still match the
    /// stored one, otherwise `Conflict` is returned and nothing commits.
    pub async fn update_shoot(&self, shoot: Shoot) -> Result<Shoot, RegistryError> {
        let old = self.shoots.get(&shoot.key())?;

        let shoot = match self.shoot_admission() {
            Some(plugin) => match plugin.review(Operation::Update, &shoot, Some(&old)).await? {
                Some(mutated) => mutated,
                None => shoot,
            },
            None => shoot,
        };
        self.shoots.update(shoot)
    }

    pub async fn delete_shoot(&self, key: &ObjectKey) -> Result<Shoot, RegistryError> {
        let stored = self.shoots.get(key)?;

        if let Some(plugin) = self.shoot_admission() {
            plugin
                .review(Operation::Delete, &stored, Some(&stored))
                .await?;
        }
        self.shoots.delete(key)
    }

    // -------------------------------------------------------------------------
    // Ungated kinds
    // -------------------------------------------------------------------------

    pub fn seeds(&self) -> &Store<Seed> {
        &self.seeds
    }

    pub fn cloud_profiles(&self) -> &Store<CloudProfile> {
        &self.cloud_profiles
    }

    pub fn projects(&self) -> &Store<Project> {
        &self.projects
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Record a human-visible audit event for an object.
    pub fn record_event<T: StoredObject>(
        &self,
        object: &T,
        event_type: EventType,
        reason: &str,
        message: impl Into<String>,
    ) {
        let record = EventRecord {
            kind: T::KIND,
            object: object.key(),
            event_type,
            reason: reason.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        };

        match event_type {
            EventType::Normal => info!(
                kind = record.kind,
                object = %record.object,
                reason = %record.reason,
                message = %record.message,
                "Event recorded"
            ),
            EventType::Warning => warn!(
                kind = record.kind,
                object = %record.object,
                reason = %record.reason,
                message = %record.message,
                "Event recorded"
            ),
        }

        self.events
            .lock()
            .expect("event log lock poisoned")
            .push(record);
    }

    /// Events recorded for one object, oldest first.
    pub fn events_for(&self, key: &ObjectKey) -> Vec<EventRecord> {
        self.events
            .lock()
            .expect("event log lock poisoned")
            .iter()
            .filter(|record| record.object == *key)
            .cloned()
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use verdant_core::{
        Kubernetes, ObjectMeta, ShootNetworking, ShootProvider, ShootSpec,
    };

    use crate::admission::{AdmissionDenial, AdmissionOutcome};

    fn shoot(name: &str) -> Shoot {
        Shoot {
            metadata: ObjectMeta::namespaced("garden-dev", name),
            spec: ShootSpec {
                cloud_profile_name: "aws-profile".to_string(),
                region: "eu-west-1".to_string(),
                provider: ShootProvider {
                    provider_type: "aws".to_string(),
                    workers: vec![],
                    floating_pool_name: None,
                    load_balancer_provider: None,
                },
                secret_binding_name: "my-secret".to_string(),
                seed_name: None,
                dns: None,
                networking: ShootNetworking {
                    nodes: "10.250.0.0/16".parse().unwrap(),
                    pods: None,
                    services: None,
                },
                kubernetes: Kubernetes {
                    version: "1.6.4".parse().unwrap(),
                },
            },
        }
    }

    #[tokio::test]
    async fn test_create_get_list() {
        let registry = Registry::new();
        let created = registry.create_shoot(shoot("crown")).await.unwrap();
        assert_eq!(created.metadata.generation, 1);

        let fetched = registry
            .get_shoot(&ObjectKey::namespaced("garden-dev", "crown"))
            .unwrap();
        assert_eq!(fetched, created);
        assert_eq!(registry.list_shoots().len(), 1);

        assert!(matches!(
            registry.create_shoot(shoot("crown")).await,
            Err(RegistryError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_generation_precondition() {
        let registry = Registry::new();
        let created = registry.create_shoot(shoot("crown")).await.unwrap();

        // A well-preconditioned update commits and bumps the generation.
        let mut fresh = created.clone();
        fresh.spec.seed_name = Some("seed-1".to_string());
        let updated = registry.update_shoot(fresh).await.unwrap();
        assert_eq!(updated.metadata.generation, 2);

        // Re-submitting the stale original is a conflict.
        let mut stale = created;
        stale.spec.seed_name = Some("seed-2".to_string());
        let err = registry.update_shoot(stale).await.unwrap_err();
        assert!(err.is_conflict());

        // The losing write did not commit.
        let stored = registry
            .get_shoot(&ObjectKey::namespaced("garden-dev", "crown"))
            .unwrap();
        assert_eq!(stored.spec.seed_name.as_deref(), Some("seed-1"));
    }

    #[tokio::test]
    async fn test_watch_sees_commit_order() {
        let registry = Registry::new();
        let mut watch = registry.watch_shoots();

        let created = registry.create_shoot(shoot("crown")).await.unwrap();
        let mut update = created.clone();
        update.spec.seed_name = Some("seed-1".to_string());
        registry.update_shoot(update).await.unwrap();
        registry.delete_shoot(&created.key()).await.unwrap();

        assert!(matches!(watch.recv().await.unwrap(), WatchEvent::Added(_)));
        assert!(matches!(watch.recv().await.unwrap(), WatchEvent::Modified(_)));
        assert!(matches!(watch.recv().await.unwrap(), WatchEvent::Deleted(_)));
    }

    struct DenyAll;

    #[async_trait]
    impl AdmissionPlugin for DenyAll {
        async fn review(
            &self,
            _operation: Operation,
            _new: &Shoot,
            _old: Option<&Shoot>,
        ) -> AdmissionOutcome {
            Err(AdmissionDenial::forbidden("computer says no"))
        }
    }

    struct MutateVersion;

    #[async_trait]
    impl AdmissionPlugin for MutateVersion {
        async fn review(
            &self,
            _operation: Operation,
            new: &Shoot,
            _old: Option<&Shoot>,
        ) -> AdmissionOutcome {
            let mut mutated = new.clone();
            mutated.spec.kubernetes.version = "1.6.6".parse().unwrap();
            Ok(Some(mutated))
        }
    }

    #[tokio::test]
    async fn test_admission_denial_blocks_write() {
        let registry = Registry::new();
        registry.set_shoot_admission(Arc::new(DenyAll));

        let err = registry.create_shoot(shoot("crown")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AdmissionDenied(_)));
        assert!(registry.list_shoots().is_empty());
    }

    #[tokio::test]
    async fn test_admission_mutation_commits() {
        let registry = Registry::new();
        registry.set_shoot_admission(Arc::new(MutateVersion));

        let created = registry.create_shoot(shoot("crown")).await.unwrap();
        assert_eq!(created.spec.kubernetes.version.to_string(), "1.6.6");
    }

    #[tokio::test]
    async fn test_event_log() {
        let registry = Registry::new();
        let created = registry.create_shoot(shoot("crown")).await.unwrap();

        registry.record_event(
            &created,
            EventType::Warning,
            "SchedulingFailed",
            "no matching seed",
        );

        let events = registry.events_for(&created.key());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "SchedulingFailed");
        assert_eq!(events[0].event_type, EventType::Warning);
    }
}
