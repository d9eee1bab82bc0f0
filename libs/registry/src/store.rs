//! Generic typed store with watch fan-out and optimistic updates.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use verdant_core::ObjectKey;

use crate::error::RegistryError;
use crate::object::StoredObject;

/// Watch channel capacity per kind. Consumers that fall further behind
/// than this observe a lag and must relist.
const WATCH_CAPACITY: usize = 256;

/// A change delivered on a watch stream.
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

/// In-memory store for one object kind.
///
/// Mutations and their watch events are ordered under a single lock, so
/// subscribers observe changes in commit order.
pub struct Store<T: StoredObject> {
    objects: Mutex<HashMap<ObjectKey, T>>,
    watch: broadcast::Sender<WatchEvent<T>>,
}

impl<T: StoredObject> Store<T> {
    pub fn new() -> Self {
        let (watch, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: Mutex::new(HashMap::new()),
            watch,
        }
    }

    /// All objects, in no particular order.
    pub fn list(&self) -> Vec<T> {
        self.objects
            .lock()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &ObjectKey) -> Result<T, RegistryError> {
        self.objects
            .lock()
            .expect("store lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                kind: T::KIND,
                key: key.clone(),
            })
    }

    /// Insert a new object at generation 1.
    pub fn create(&self, mut object: T) -> Result<T, RegistryError> {
        let key = object.key();
        let mut objects = self.objects.lock().expect("store lock poisoned");

        if objects.contains_key(&key) {
            return Err(RegistryError::AlreadyExists { kind: T::KIND, key });
        }

        object.set_generation(1);
        objects.insert(key, object.clone());
        let _ = self.watch.send(WatchEvent::Added(object.clone()));
        Ok(object)
    }

    /// Commit an update if the caller's generation still matches the
    /// stored one; the committed object carries the bumped generation.
    pub fn update(&self, mut object: T) -> Result<T, RegistryError> {
        let key = object.key();
        let mut objects = self.objects.lock().expect("store lock poisoned");

        let stored = objects.get(&key).ok_or_else(|| RegistryError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        })?;

        if stored.generation() != object.generation() {
            return Err(RegistryError::Conflict { kind: T::KIND, key });
        }

        object.set_generation(stored.generation() + 1);
        objects.insert(key, object.clone());
        let _ = self.watch.send(WatchEvent::Modified(object.clone()));
        Ok(object)
    }

    /// Remove an object, delivering a final `Deleted` event.
    pub fn delete(&self, key: &ObjectKey) -> Result<T, RegistryError> {
        let mut objects = self.objects.lock().expect("store lock poisoned");

        let removed = objects.remove(key).ok_or_else(|| RegistryError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        })?;

        let _ = self.watch.send(WatchEvent::Deleted(removed.clone()));
        Ok(removed)
    }

    /// Subscribe to changes committed after this call.
    pub fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.watch.subscribe()
    }
}

impl<T: StoredObject> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}
