//! The trait connecting the object model to the generic store.

use std::collections::BTreeMap;

use verdant_core::{CloudProfile, ObjectKey, Project, Seed, Shoot};

/// An object kind the registry can hold.
pub trait StoredObject: Clone + Send + Sync + 'static {
    /// Kind name used in errors, events, and logs.
    const KIND: &'static str;

    fn key(&self) -> ObjectKey;

    fn labels(&self) -> &BTreeMap<String, String>;

    fn generation(&self) -> u64;

    fn set_generation(&mut self, generation: u64);
}

macro_rules! stored_object {
    ($type:ty, $kind:literal) => {
        impl StoredObject for $type {
            const KIND: &'static str = $kind;

            fn key(&self) -> ObjectKey {
                self.metadata.key()
            }

            fn labels(&self) -> &BTreeMap<String, String> {
                &self.metadata.labels
            }

            fn generation(&self) -> u64 {
                self.metadata.generation
            }

            fn set_generation(&mut self, generation: u64) {
                self.metadata.generation = generation;
            }
        }
    };
}

stored_object!(Shoot, "Shoot");
stored_object!(Seed, "Seed");
stored_object!(CloudProfile, "CloudProfile");
stored_object!(Project, "Project");
