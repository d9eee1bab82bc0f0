//! Dev-mode bootstrap: seed the registry from a JSON state file.
//!
//! The in-process registry starts empty; in development the operator can
//! point `VERDANT_STATE_FILE` at a JSON document describing cloud profiles,
//! projects, seeds, and shoots. Shoots pass through the admission gate like
//! any other write.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;
use verdant_core::{CloudProfile, Project, Seed, Shoot};
use verdant_registry::Registry;

use crate::indexers::Indexers;

/// How long to wait for the caches to observe the bootstrap objects before
/// shoots hit admission.
const CATCH_UP_TIMEOUT: Duration = Duration::from_secs(5);

/// Objects loaded into the registry at startup.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFile {
    #[serde(default)]
    pub cloud_profiles: Vec<CloudProfile>,

    #[serde(default)]
    pub projects: Vec<Project>,

    #[serde(default)]
    pub seeds: Vec<Seed>,

    #[serde(default)]
    pub shoots: Vec<Shoot>,
}

/// Load a state file into an empty registry.
pub async fn load_state_file(registry: &Registry, indexers: &Indexers, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading state file {}", path.display()))?;
    let state: StateFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing state file {}", path.display()))?;

    let profile_count = state.cloud_profiles.len();
    let project_count = state.projects.len();
    let seed_count = state.seeds.len();
    let shoot_count = state.shoots.len();

    for profile in state.cloud_profiles {
        registry.cloud_profiles().create(profile)?;
    }
    for project in state.projects {
        registry.projects().create(project)?;
    }
    for seed in state.seeds {
        registry.seeds().create(seed)?;
    }

    // Admission consults the caches, so they must observe the referenced
    // objects before the shoots are created.
    let deadline = tokio::time::Instant::now() + CATCH_UP_TIMEOUT;
    while indexers.cloud_profiles.list().len() < profile_count
        || indexers.projects.list().len() < project_count
        || indexers.seeds.list().len() < seed_count
    {
        if tokio::time::Instant::now() >= deadline {
            bail!("indexers did not catch up with bootstrap objects within {CATCH_UP_TIMEOUT:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for shoot in state.shoots {
        let key = shoot.key();
        registry
            .create_shoot(shoot)
            .await
            .with_context(|| format!("bootstrap shoot {key} was not admitted"))?;
    }

    info!(
        path = %path.display(),
        cloud_profiles = profile_count,
        projects = project_count,
        seeds = seed_count,
        shoots = shoot_count,
        "State file loaded"
    );
    Ok(())
}
