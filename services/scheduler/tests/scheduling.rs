//! End-to-end scheduling tests against the in-process registry: admission,
//! placement, retry after landscape changes, and the two-actor race.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use verdant_core::{
    CloudProfile, CloudProfileSpec, Condition, ConditionStatus, ExpirableVersion, Kubernetes,
    KubernetesSettings, ObjectMeta, Project, ProjectSpec, Region, Seed, SeedNetworks,
    SeedProvider, SeedSpec, SeedStatus, Shoot, ShootNetworking, ShootProvider, ShootSpec,
    CONDITION_SEED_AVAILABLE,
};
use verdant_registry::{DenialKind, EventType, Registry, RegistryError};
use verdant_scheduler::admission::ShootValidator;
use verdant_scheduler::config::{Config, Strategy};
use verdant_scheduler::controller::{ShootReconciler, ShootScheduler};
use verdant_scheduler::indexers::Indexers;

const NAMESPACE: &str = "garden-dev";

fn test_config() -> Config {
    Config {
        strategy: Strategy::SameRegion,
        concurrent_syncs: 1,
        retry_sync_period: Duration::from_millis(10),
        max_retry_period: Duration::from_millis(100),
        ..Config::default()
    }
}

fn project() -> Project {
    Project {
        metadata: ObjectMeta::named("dev"),
        spec: ProjectSpec {
            namespace: NAMESPACE.to_string(),
        },
    }
}

fn profile() -> CloudProfile {
    CloudProfile {
        metadata: ObjectMeta::named("aws-profile"),
        spec: CloudProfileSpec {
            provider_type: "aws".to_string(),
            kubernetes: KubernetesSettings {
                versions: vec![ExpirableVersion::new("1.6.4".parse().unwrap())],
            },
            machine_images: vec![],
            machine_types: vec![],
            volume_types: vec![],
            regions: vec![Region {
                name: "eu-west-1".to_string(),
                zones: vec![],
                fault_domain_count: None,
                update_domain_count: None,
            }],
            seed_selector: None,
            floating_pools: vec![],
            load_balancer_providers: vec![],
        },
    }
}

fn seed(name: &str) -> Seed {
    Seed {
        metadata: ObjectMeta::named(name),
        spec: SeedSpec {
            provider: SeedProvider {
                provider_type: "aws".to_string(),
                region: "eu-west-1".to_string(),
            },
            networks: SeedNetworks {
                nodes: "10.240.0.0/16".parse().unwrap(),
                pods: "10.241.128.0/17".parse().unwrap(),
                services: "10.241.0.0/17".parse().unwrap(),
            },
            taints: vec![],
        },
        status: SeedStatus {
            conditions: vec![Condition {
                condition_type: CONDITION_SEED_AVAILABLE.to_string(),
                status: ConditionStatus::True,
            }],
        },
    }
}

fn shoot(name: &str) -> Shoot {
    Shoot {
        metadata: ObjectMeta::namespaced(NAMESPACE, name),
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
                pods: Some("100.96.0.0/11".parse().unwrap()),
                services: Some("100.64.0.0/13".parse().unwrap()),
            },
            kubernetes: Kubernetes {
                version: "1.6.4".parse().unwrap(),
            },
        },
    }
}

struct Harness {
    registry: Arc<Registry>,
    indexers: Indexers,
    shutdown: watch::Sender<bool>,
    scheduler: tokio::task::JoinHandle<()>,
}

impl Harness {
    /// Registry with admission wired, warm indexers, and a running
    /// scheduler.
    async fn start(config: Config) -> Self {
        let registry = Arc::new(Registry::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let indexers = Indexers::spawn(registry.clone(), shutdown_rx.clone());
        registry.set_shoot_admission(Arc::new(ShootValidator::new(indexers.clone())));
        assert!(indexers.wait_synced(Duration::from_secs(2)).await);

        let scheduler = ShootScheduler::new(registry.clone(), indexers.clone(), &config);
        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        Self {
            registry,
            indexers,
            shutdown,
            scheduler: handle,
        }
    }

    /// Create the landscape objects and wait until the caches see them.
    async fn populate(&self, projects: Vec<Project>, profiles: Vec<CloudProfile>, seeds: Vec<Seed>) {
        let (projects_len, profiles_len, seeds_len) = (projects.len(), profiles.len(), seeds.len());
        for project in projects {
            self.registry.projects().create(project).unwrap();
        }
        for profile in profiles {
            self.registry.cloud_profiles().create(profile).unwrap();
        }
        for seed in seeds {
            self.registry.seeds().create(seed).unwrap();
        }

        let indexers = self.indexers.clone();
        wait_until("indexers observe the landscape", move || {
            indexers.projects.list().len() >= projects_len
                && indexers.cloud_profiles.list().len() >= profiles_len
                && indexers.seeds.list().len() >= seeds_len
        })
        .await;
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.scheduler.await;
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting until {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_schedules_shoot_onto_same_region_seed() {
    let harness = Harness::start(test_config()).await;
    harness
        .populate(vec![project()], vec![profile()], vec![seed("seed-a")])
        .await;

    let created = harness.registry.create_shoot(shoot("crown")).await.unwrap();
    let key = created.key();

    let registry = harness.registry.clone();
    let lookup = key.clone();
    wait_until("shoot is scheduled", move || {
        registry
            .get_shoot(&lookup)
            .map(|shoot| shoot.spec.seed_name.is_some())
            .unwrap_or(false)
    })
    .await;

    let scheduled = harness.registry.get_shoot(&key).unwrap();
    assert_eq!(scheduled.spec.seed_name.as_deref(), Some("seed-a"));

    let events = harness.registry.events_for(&key);
    assert!(events.iter().any(|event| {
        event.event_type == EventType::Normal
            && event.reason == "SchedulingSuccessful"
            && event.message.contains("seed-a")
    }));

    harness.stop().await;
}

#[tokio::test]
async fn test_reports_failure_when_no_seed_has_disjoint_network() {
    let harness = Harness::start(test_config()).await;

    // The only seed shares the shoot's node network.
    let mut overlapping = seed("seed-a");
    overlapping.spec.networks.nodes = "10.250.0.0/16".parse().unwrap();
    harness
        .populate(vec![project()], vec![profile()], vec![overlapping])
        .await;

    let created = harness.registry.create_shoot(shoot("crown")).await.unwrap();
    let key = created.key();

    let registry = harness.registry.clone();
    let lookup = key.clone();
    wait_until("scheduling failure is reported", move || {
        registry.events_for(&lookup).iter().any(|event| {
            event.event_type == EventType::Warning && event.reason == "SchedulingFailed"
        })
    })
    .await;

    let events = harness.registry.events_for(&key);
    assert!(events
        .iter()
        .any(|event| event.message.contains("disjoint network")));
    assert!(harness
        .registry
        .get_shoot(&key)
        .unwrap()
        .spec
        .seed_name
        .is_none());

    harness.stop().await;
}

#[tokio::test]
async fn test_admission_rejects_overlapping_network_on_bound_seed() {
    let harness = Harness::start(test_config()).await;
    harness
        .populate(vec![project()], vec![profile()], vec![seed("seed-a")])
        .await;

    let mut bound = shoot("crown");
    bound.spec.seed_name = Some("seed-a".to_string());
    bound.spec.networking.nodes = "10.240.0.0/16".parse().unwrap();

    let err = harness.registry.create_shoot(bound).await.unwrap_err();
    match err {
        RegistryError::AdmissionDenied(denial) => {
            assert_eq!(denial.kind, DenialKind::Forbidden);
            assert!(denial.message.contains("disjoint"));
        }
        other => panic!("unexpected error: {other}"),
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_pre_assigned_shoot_is_left_alone() {
    let harness = Harness::start(test_config()).await;
    harness
        .populate(vec![project()], vec![profile()], vec![seed("seed-a")])
        .await;

    let mut pinned = shoot("pinned");
    pinned.spec.seed_name = Some("seed-a".to_string());
    let created = harness.registry.create_shoot(pinned).await.unwrap();
    let key = created.key();

    // Give the controller time to (incorrectly) act.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stored = harness.registry.get_shoot(&key).unwrap();
    assert_eq!(stored.metadata.generation, created.metadata.generation);
    assert!(harness.registry.events_for(&key).is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_retries_until_landscape_provides_a_seed() {
    let harness = Harness::start(test_config()).await;
    harness.populate(vec![project()], vec![profile()], vec![]).await;

    let created = harness.registry.create_shoot(shoot("patient")).await.unwrap();
    let key = created.key();

    let registry = harness.registry.clone();
    let lookup = key.clone();
    wait_until("initial scheduling failure", move || {
        registry.events_for(&lookup).iter().any(|event| {
            event.event_type == EventType::Warning && event.reason == "SchedulingFailed"
        })
    })
    .await;

    // A seed appears; the backed-off key must eventually land on it.
    harness.registry.seeds().create(seed("seed-late")).unwrap();

    let registry = harness.registry.clone();
    let lookup = key.clone();
    wait_until("shoot is scheduled after retry", move || {
        registry
            .get_shoot(&lookup)
            .map(|shoot| shoot.spec.seed_name.as_deref() == Some("seed-late"))
            .unwrap_or(false)
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_racing_reconcilers_bind_exactly_once() {
    let harness = Harness::start(test_config()).await;
    harness
        .populate(vec![project()], vec![profile()], vec![seed("seed-a")])
        .await;

    let created = harness.registry.create_shoot(shoot("race")).await.unwrap();
    let key = created.key();

    let indexers = harness.indexers.clone();
    let lookup = key.clone();
    wait_until("cache observes the shoot", move || {
        indexers.shoots.get(&lookup).is_some()
    })
    .await;

    // Two independent workers reconcile the same key concurrently. Both
    // compute a candidate; only one optimistic update can win.
    let first = ShootReconciler::new(
        harness.registry.clone(),
        harness.indexers.clone(),
        Strategy::SameRegion,
    );
    let second = ShootReconciler::new(
        harness.registry.clone(),
        harness.indexers.clone(),
        Strategy::SameRegion,
    );

    let (first_result, second_result) = tokio::join!(first.reconcile(&key), second.reconcile(&key));
    assert!(first_result.is_ok());
    assert!(second_result.is_ok());

    let stored = harness.registry.get_shoot(&key).unwrap();
    assert_eq!(stored.spec.seed_name.as_deref(), Some("seed-a"));

    let successes = harness
        .registry
        .events_for(&key)
        .iter()
        .filter(|event| event.reason == "SchedulingSuccessful")
        .count();
    assert_eq!(successes, 1);
    let failures = harness
        .registry
        .events_for(&key)
        .iter()
        .filter(|event| event.reason == "SchedulingFailed")
        .count();
    assert_eq!(failures, 0);

    harness.stop().await;
}
