//! Watch-fed in-memory caches of registry objects.
//!
//! One writer task per kind applies watch events to its cache; readers take
//! cheap snapshots (an `Arc` clone of the whole map). On watch lag the
//! writer relists, so the cache converges even after falling behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, warn};
use verdant_core::{CloudProfile, ObjectKey, Project, Seed, Shoot};
use verdant_registry::{Registry, StoredObject, WatchEvent};
use verdant_selector::LabelSelector;

/// Snapshot cache for one object kind.
pub struct Indexer<T> {
    cache: RwLock<Arc<HashMap<ObjectKey, Arc<T>>>>,
    synced: AtomicBool,
}

impl<T: StoredObject> Indexer<T> {
    fn new() -> Self {
        Self {
            cache: RwLock::new(Arc::new(HashMap::new())),
            synced: AtomicBool::new(false),
        }
    }

    /// The current cache contents. The snapshot is immutable; later writes
    /// replace the map rather than mutating it.
    pub fn snapshot(&self) -> Arc<HashMap<ObjectKey, Arc<T>>> {
        self.cache.read().expect("indexer lock poisoned").clone()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<T>> {
        self.snapshot().get(key).cloned()
    }

    pub fn list(&self) -> Vec<Arc<T>> {
        self.snapshot().values().cloned().collect()
    }

    /// Objects whose labels satisfy the selector.
    pub fn list_matching(&self, selector: &LabelSelector) -> Vec<Arc<T>> {
        self.snapshot()
            .values()
            .filter(|object| selector.matches(object.labels()))
            .cloned()
            .collect()
    }

    /// True once the initial list has been applied.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub(crate) fn replace(&self, objects: Vec<T>) {
        let map: HashMap<ObjectKey, Arc<T>> = objects
            .into_iter()
            .map(|object| (object.key(), Arc::new(object)))
            .collect();
        *self.cache.write().expect("indexer lock poisoned") = Arc::new(map);
        self.synced.store(true, Ordering::Release);
    }

    fn apply(&self, event: WatchEvent<T>) {
        let mut guard = self.cache.write().expect("indexer lock poisoned");
        let mut map = (**guard).clone();
        match event {
            WatchEvent::Added(object) | WatchEvent::Modified(object) => {
                map.insert(object.key(), Arc::new(object));
            }
            WatchEvent::Deleted(object) => {
                map.remove(&object.key());
            }
        }
        *guard = Arc::new(map);
    }
}

/// Where an indexer's writer task reads from.
trait WatchSource<T: StoredObject>: Send + Sync + 'static {
    fn list(&self) -> Vec<T>;
    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>>;
}

struct ShootSource(Arc<Registry>);

impl WatchSource<Shoot> for ShootSource {
    fn list(&self) -> Vec<Shoot> {
        self.0.list_shoots()
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<Shoot>> {
        self.0.watch_shoots()
    }
}

macro_rules! store_source {
    ($name:ident, $type:ty, $accessor:ident) => {
        struct $name(Arc<Registry>);

        impl WatchSource<$type> for $name {
            fn list(&self) -> Vec<$type> {
                self.0.$accessor().list()
            }

            fn watch(&self) -> broadcast::Receiver<WatchEvent<$type>> {
                self.0.$accessor().watch()
            }
        }
    };
}

store_source!(SeedSource, Seed, seeds);
store_source!(CloudProfileSource, CloudProfile, cloud_profiles);
store_source!(ProjectSource, Project, projects);

/// Writer loop for one kind: subscribe, seed with a full list, then apply
/// events until shutdown. Lag triggers a relist.
async fn run_indexer<T, S>(source: S, indexer: Arc<Indexer<T>>, mut shutdown: watch::Receiver<bool>)
where
    T: StoredObject,
    S: WatchSource<T>,
{
    let mut events = source.watch();
    indexer.replace(source.list());
    debug!(kind = T::KIND, "Indexer synced");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => indexer.apply(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(kind = T::KIND, skipped, "Indexer lagged behind watch, relisting");
                    indexer.replace(source.list());
                }
                Err(RecvError::Closed) => {
                    debug!(kind = T::KIND, "Watch closed, stopping indexer");
                    break;
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!(kind = T::KIND, "Indexer shutting down");
                    break;
                }
            }
        }
    }
}

/// The shared read-only caches the admission validator and scheduler use.
#[derive(Clone)]
pub struct Indexers {
    pub shoots: Arc<Indexer<Shoot>>,
    pub seeds: Arc<Indexer<Seed>>,
    pub cloud_profiles: Arc<Indexer<CloudProfile>>,
    pub projects: Arc<Indexer<Project>>,
}

impl Indexers {
    /// Create the caches and spawn one writer task per kind.
    pub fn spawn(registry: Arc<Registry>, shutdown: watch::Receiver<bool>) -> Self {
        let indexers = Self {
            shoots: Arc::new(Indexer::new()),
            seeds: Arc::new(Indexer::new()),
            cloud_profiles: Arc::new(Indexer::new()),
            projects: Arc::new(Indexer::new()),
        };

        tokio::spawn(run_indexer(
            ShootSource(registry.clone()),
            indexers.shoots.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(run_indexer(
            SeedSource(registry.clone()),
            indexers.seeds.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(run_indexer(
            CloudProfileSource(registry.clone()),
            indexers.cloud_profiles.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(run_indexer(
            ProjectSource(registry),
            indexers.projects.clone(),
            shutdown,
        ));

        indexers
    }

    pub fn has_synced(&self) -> bool {
        self.shoots.has_synced()
            && self.seeds.has_synced()
            && self.cloud_profiles.has_synced()
            && self.projects.has_synced()
    }

    /// Wait until every cache has applied its initial list.
    pub async fn wait_synced(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.has_synced() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// The project owning a namespace, if any.
    pub fn project_for_namespace(&self, namespace: &str) -> Option<Arc<Project>> {
        self.projects
            .list()
            .into_iter()
            .find(|project| project.spec.namespace == namespace)
    }
}

#[cfg(test)]
impl Indexers {
    /// Caches without writer tasks, populated directly by unit tests.
    pub(crate) fn detached() -> Self {
        Self {
            shoots: Arc::new(Indexer::new()),
            seeds: Arc::new(Indexer::new()),
            cloud_profiles: Arc::new(Indexer::new()),
            projects: Arc::new(Indexer::new()),
        }
    }
}
