//! Candidate selection.
//!
//! Pure function from `(shoot, cloud profile, shoots, seeds, strategy)` to
//! the chosen seed: a strategy-specific pre-filter, the universal
//! disjointness/selector filter, and a least-loaded tie-break.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use verdant_core::{CloudProfile, Seed, Shoot, TAINT_INVISIBLE};
use verdant_netcheck::validate_network_disjointedness;
use verdant_registry::RegistryError;
use verdant_selector::{LabelSelector, SelectorError};

use crate::config::Strategy;

/// Why a shoot could not be placed.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The strategy pre-filter produced no candidates.
    #[error("no matching seed found for cloud profile {cloud_profile:?}, region {region:?}, strategy {strategy}")]
    NoCandidates {
        cloud_profile: String,
        region: String,
        strategy: Strategy,
    },

    /// Candidates existed but none passed the universal filter.
    #[error("found {considered} possible seed cluster(s), however none have a disjoint network")]
    NoDisjointNetwork { considered: usize },

    /// The shoot references a cloud profile the cache does not know.
    #[error("cloud profile {0:?} not found")]
    CloudProfileNotFound(String),

    /// The profile's seed selector is malformed.
    #[error("seed selector of cloud profile {cloud_profile:?} is invalid: {source}")]
    InvalidSeedSelector {
        cloud_profile: String,
        #[source]
        source: SelectorError,
    },

    /// The registry failed or refused the binding write.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Select the seed to host a shoot's control plane.
pub fn determine_best_seed(
    shoot: &Shoot,
    profile: &CloudProfile,
    shoots: &[Arc<Shoot>],
    seeds: &[Arc<Seed>],
    strategy: Strategy,
) -> Result<Arc<Seed>, ScheduleError> {
    let candidates = match strategy {
        Strategy::SameRegion => same_region_candidates(shoot, seeds),
        Strategy::MinimalDistance => minimal_distance_candidates(shoot, seeds),
    };

    if candidates.is_empty() {
        return Err(ScheduleError::NoCandidates {
            cloud_profile: shoot.spec.cloud_profile_name.clone(),
            region: shoot.spec.region.clone(),
            strategy,
        });
    }

    let selector = profile
        .spec
        .seed_selector
        .clone()
        .unwrap_or_else(LabelSelector::everything);
    selector
        .validate()
        .map_err(|source| ScheduleError::InvalidSeedSelector {
            cloud_profile: profile.metadata.name.clone(),
            source,
        })?;

    let considered = candidates.len();
    let filtered: Vec<&Arc<Seed>> = candidates
        .into_iter()
        .filter(|seed| networks_are_disjoint(seed, shoot))
        .filter(|seed| selector.matches(&seed.metadata.labels))
        .collect();

    // Least loaded wins; the first candidate seen keeps ties.
    let usage = seed_usage(shoots);
    filtered
        .into_iter()
        .min_by_key(|seed| usage.get(seed.metadata.name.as_str()).copied().unwrap_or(0))
        .cloned()
        .ok_or(ScheduleError::NoDisjointNetwork { considered })
}

/// Seeds eligible under every strategy: not terminating, same provider,
/// not invisible, and reporting available.
fn is_eligible(seed: &Seed, shoot: &Shoot) -> bool {
    !seed.metadata.is_terminating()
        && seed.spec.provider.provider_type == shoot.spec.provider.provider_type
        && !seed.has_taint(TAINT_INVISIBLE)
        && seed.is_available()
}

fn same_region_candidates<'a>(shoot: &Shoot, seeds: &'a [Arc<Seed>]) -> Vec<&'a Arc<Seed>> {
    seeds
        .iter()
        .filter(|seed| is_eligible(seed, shoot) && seed.spec.provider.region == shoot.spec.region)
        .collect()
}

/// Same region when possible; otherwise the seeds whose region shares the
/// longest common prefix with the shoot's region. The scan is
/// character-based: whenever a longer prefix is first observed the
/// candidate list resets and accumulation restarts at that level.
fn minimal_distance_candidates<'a>(shoot: &Shoot, seeds: &'a [Arc<Seed>]) -> Vec<&'a Arc<Seed>> {
    let same_region = same_region_candidates(shoot, seeds);
    if !same_region.is_empty() {
        return same_region;
    }

    let shoot_region = shoot.spec.region.as_bytes();
    let mut candidates: Vec<&Arc<Seed>> = Vec::new();
    let mut max_matching = 0usize;

    for seed in seeds.iter().filter(|seed| is_eligible(seed, shoot)) {
        let seed_region = seed.spec.provider.region.as_bytes();

        while max_matching < shoot_region.len() {
            if seed_region.starts_with(&shoot_region[..max_matching + 1]) {
                candidates.clear();
                max_matching += 1;
                continue;
            } else if seed_region.starts_with(&shoot_region[..max_matching]) {
                candidates.push(seed);
            }
            break;
        }
    }

    candidates
}

fn networks_are_disjoint(seed: &Seed, shoot: &Shoot) -> bool {
    validate_network_disjointedness(
        &seed.spec.networks.nodes,
        &seed.spec.networks.pods,
        &seed.spec.networks.services,
        &shoot.spec.networking.nodes,
        shoot.spec.networking.pods.as_ref(),
        shoot.spec.networking.services.as_ref(),
    )
    .is_empty()
}

/// How many shoots each seed currently hosts.
fn seed_usage(shoots: &[Arc<Shoot>]) -> HashMap<&str, usize> {
    let mut usage: HashMap<&str, usize> = HashMap::new();
    for shoot in shoots {
        if let Some(seed_name) = &shoot.spec.seed_name {
            *usage.entry(seed_name.as_str()).or_insert(0) += 1;
        }
    }
    usage
}
