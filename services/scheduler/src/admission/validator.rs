//! The shoot admission pipeline.
//!
//! Checks run in a fixed order and the first failure stops evaluation.
//! Denials carry `bad-request` for malformed input and unresolvable
//! references, `forbidden` for policy violations. The only mutation the
//! pipeline produces is the defaulted Kubernetes patch version.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use verdant_core::{
    highest_patch_version, CloudProfile, ObjectKey, Project, Seed, Shoot, GARDEN_NAMESPACE,
    TAINT_PROTECTED,
};
use verdant_netcheck::validate_network_disjointedness;
use verdant_registry::{AdmissionDenial, AdmissionOutcome, AdmissionPlugin, Operation};

use crate::indexers::Indexers;

/// Ceiling for the composite technical identifier `<project>--<shoot>`,
/// derived from the namespace length limits of downstream components.
const TECHNICAL_ID_MAX_LEN: usize = 21;

/// Validates shoots against their project, cloud profile, seed, and
/// sibling shoots.
pub struct ShootValidator {
    indexers: Indexers,
}

impl ShootValidator {
    pub fn new(indexers: Indexers) -> Self {
        Self { indexers }
    }

    fn validate(&self, operation: Operation, shoot: &Shoot) -> AdmissionOutcome {
        let namespace = shoot
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| AdmissionDenial::bad_request("shoot has no namespace"))?;

        let project = self
            .indexers
            .project_for_namespace(namespace)
            .ok_or_else(|| {
                AdmissionDenial::bad_request(format!("no project found for namespace {namespace:?}"))
            })?;

        if operation == Operation::Create {
            check_names(&project, shoot)?;
            if project.metadata.is_terminating() {
                return Err(AdmissionDenial::forbidden(format!(
                    "project {:?} is already marked for deletion; no new shoots may be created",
                    project.metadata.name
                )));
            }
        }

        let profile = self
            .indexers
            .cloud_profiles
            .get(&ObjectKey::cluster(&shoot.spec.cloud_profile_name))
            .ok_or_else(|| {
                AdmissionDenial::bad_request(format!(
                    "cloud profile {:?} not found",
                    shoot.spec.cloud_profile_name
                ))
            })?;

        let seed = match &shoot.spec.seed_name {
            Some(name) => Some(
                self.indexers
                    .seeds
                    .get(&ObjectKey::cluster(name))
                    .ok_or_else(|| {
                        AdmissionDenial::bad_request(format!("seed {name:?} not found"))
                    })?,
            ),
            None => None,
        };

        check_provider_type(shoot, &profile)?;
        check_worker_counts(shoot)?;

        if let Some(seed) = &seed {
            check_seed_protection(seed, namespace)?;
            check_networks(shoot, seed)?;
        }

        self.check_domain(shoot)?;

        let mutated = check_kubernetes_version(shoot, &profile)?;

        check_machine_images(shoot, &profile)?;
        check_worker_constraints(shoot, &profile)?;
        check_provider_extras(shoot, &profile)?;

        Ok(mutated)
    }

    /// The shoot's external domain must not collide with any sibling
    /// shoot's domain, including parent/subdomain relations.
    fn check_domain(&self, shoot: &Shoot) -> Result<(), AdmissionDenial> {
        let Some(domain) = shoot.spec.dns.as_ref().and_then(|dns| dns.domain.as_deref()) else {
            return Ok(());
        };

        let key = shoot.key();
        for other in self.indexers.shoots.list() {
            if other.key() == key {
                continue;
            }
            let Some(other_domain) = other.spec.dns.as_ref().and_then(|dns| dns.domain.as_deref())
            else {
                continue;
            };
            if domains_overlap(domain, other_domain) {
                return Err(AdmissionDenial::forbidden(format!(
                    "domain {domain:?} collides with domain {other_domain:?} of shoot {}",
                    other.key()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AdmissionPlugin for ShootValidator {
    async fn review(
        &self,
        operation: Operation,
        new: &Shoot,
        _old: Option<&Shoot>,
    ) -> AdmissionOutcome {
        let outcome = self.validate(operation, new);
        if let Err(denial) = &outcome {
            debug!(
                shoot = %new.key(),
                kind = %denial.kind,
                message = %denial.message,
                "Shoot admission denied"
            );
        }
        outcome
    }
}

fn check_names(project: &Project, shoot: &Shoot) -> Result<(), AdmissionDenial> {
    let project_name = &project.metadata.name;
    if project_name.contains("--") {
        return Err(AdmissionDenial::bad_request(format!(
            "project name {project_name:?} must not contain consecutive hyphens"
        )));
    }

    if project_name.len() + 1 + shoot.metadata.name.len() > TECHNICAL_ID_MAX_LEN {
        return Err(AdmissionDenial::bad_request(format!(
            "the combined project and shoot name must not exceed {} characters: got {:?} and {:?}",
            TECHNICAL_ID_MAX_LEN, project_name, shoot.metadata.name
        )));
    }

    Ok(())
}

fn check_provider_type(shoot: &Shoot, profile: &CloudProfile) -> Result<(), AdmissionDenial> {
    if shoot.spec.provider.provider_type != profile.spec.provider_type {
        return Err(AdmissionDenial::bad_request(format!(
            "provider type {:?} does not match cloud profile type {:?}",
            shoot.spec.provider.provider_type, profile.spec.provider_type
        )));
    }
    Ok(())
}

fn check_worker_counts(shoot: &Shoot) -> Result<(), AdmissionDenial> {
    for worker in &shoot.spec.provider.workers {
        if worker.minimum > worker.maximum {
            return Err(AdmissionDenial::bad_request(format!(
                "worker {:?}: minimum {} exceeds maximum {}",
                worker.name, worker.minimum, worker.maximum
            )));
        }
    }
    Ok(())
}

fn check_seed_protection(seed: &Seed, namespace: &str) -> Result<(), AdmissionDenial> {
    if seed.has_taint(TAINT_PROTECTED) && namespace != GARDEN_NAMESPACE {
        return Err(AdmissionDenial::forbidden(format!(
            "seed {:?} is protected; only shoots in the {:?} namespace may use it",
            seed.metadata.name, GARDEN_NAMESPACE
        )));
    }
    Ok(())
}

fn check_networks(shoot: &Shoot, seed: &Seed) -> Result<(), AdmissionDenial> {
    let violations = validate_network_disjointedness(
        &seed.spec.networks.nodes,
        &seed.spec.networks.pods,
        &seed.spec.networks.services,
        &shoot.spec.networking.nodes,
        shoot.spec.networking.pods.as_ref(),
        shoot.spec.networking.services.as_ref(),
    );

    if !violations.is_empty() {
        let details: Vec<String> = violations.iter().map(ToString::to_string).collect();
        return Err(AdmissionDenial::forbidden(format!(
            "shoot networks must be disjoint from seed {:?}: {}",
            seed.metadata.name,
            details.join("; ")
        )));
    }
    Ok(())
}

/// Resolve a `MAJOR.MINOR` request to the highest non-expired patch in the
/// profile, or verify a full version is published and not expired.
fn check_kubernetes_version(shoot: &Shoot, profile: &CloudProfile) -> AdmissionOutcome {
    let now = Utc::now();
    let requested = shoot.spec.kubernetes.version;
    let published = &profile.spec.kubernetes.versions;

    if requested.is_short() {
        return match highest_patch_version(published, &requested, now) {
            Some(resolved) => {
                let mut mutated = shoot.clone();
                mutated.spec.kubernetes.version = resolved;
                Ok(Some(mutated))
            }
            None => Err(AdmissionDenial::forbidden(format!(
                "no non-expired patch version matching {requested} found in cloud profile {:?}",
                profile.metadata.name
            ))),
        };
    }

    let supported = published
        .iter()
        .any(|version| version.version == requested && !version.is_expired(now));
    if !supported {
        return Err(AdmissionDenial::forbidden(format!(
            "kubernetes version {requested} is expired or not supported by cloud profile {:?}",
            profile.metadata.name
        )));
    }
    Ok(None)
}

fn check_machine_images(shoot: &Shoot, profile: &CloudProfile) -> Result<(), AdmissionDenial> {
    if shoot.spec.provider.workers.is_empty() {
        return Ok(());
    }

    // Workers without an explicit image are defaulted downstream; that is
    // only sound when the profile publishes at least one image.
    if profile.spec.machine_images.is_empty() {
        return Err(AdmissionDenial::forbidden(format!(
            "cloud profile {:?} publishes no machine images",
            profile.metadata.name
        )));
    }

    let now = Utc::now();
    for worker in &shoot.spec.provider.workers {
        let Some(image) = &worker.machine.image else {
            continue;
        };

        match profile.spec.machine_image_version(&image.name, &image.version) {
            None => {
                return Err(AdmissionDenial::forbidden(format!(
                    "machine image {:?} version {} is not supported by cloud profile {:?}",
                    image.name, image.version, profile.metadata.name
                )));
            }
            Some(published) if published.is_expired(now) => {
                return Err(AdmissionDenial::forbidden(format!(
                    "machine image {:?} version {} has expired",
                    image.name, image.version
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn check_worker_constraints(shoot: &Shoot, profile: &CloudProfile) -> Result<(), AdmissionDenial> {
    for worker in &shoot.spec.provider.workers {
        let machine_name = &worker.machine.machine_type;
        let machine_type = profile.spec.machine_type(machine_name).ok_or_else(|| {
            AdmissionDenial::forbidden(format!(
                "machine type {machine_name:?} is not supported by cloud profile {:?}",
                profile.metadata.name
            ))
        })?;
        if !machine_type.is_usable() {
            return Err(AdmissionDenial::forbidden(format!(
                "machine type {machine_name:?} is marked unusable"
            )));
        }

        if let Some(volume) = &worker.volume {
            let volume_name = &volume.volume_type;
            let volume_type = profile.spec.volume_type(volume_name).ok_or_else(|| {
                AdmissionDenial::forbidden(format!(
                    "volume type {volume_name:?} is not supported by cloud profile {:?}",
                    profile.metadata.name
                ))
            })?;
            if !volume_type.is_usable() {
                return Err(AdmissionDenial::forbidden(format!(
                    "volume type {volume_name:?} is marked unusable"
                )));
            }
        }
    }

    let region = profile.spec.region(&shoot.spec.region).ok_or_else(|| {
        AdmissionDenial::forbidden(format!(
            "region {:?} is not supported by cloud profile {:?}",
            shoot.spec.region, profile.metadata.name
        ))
    })?;

    for worker in &shoot.spec.provider.workers {
        for zone_name in &worker.zones {
            let zone = region.zone(zone_name).ok_or_else(|| {
                AdmissionDenial::forbidden(format!(
                    "zone {zone_name:?} is not part of region {:?}",
                    region.name
                ))
            })?;

            if zone
                .unavailable_machine_types
                .contains(&worker.machine.machine_type)
            {
                return Err(AdmissionDenial::forbidden(format!(
                    "machine type {:?} is unavailable in zone {zone_name:?}",
                    worker.machine.machine_type
                )));
            }

            if let Some(volume) = &worker.volume {
                if zone.unavailable_volume_types.contains(&volume.volume_type) {
                    return Err(AdmissionDenial::forbidden(format!(
                        "volume type {:?} is unavailable in zone {zone_name:?}",
                        volume.volume_type
                    )));
                }
            }
        }
    }

    Ok(())
}

fn check_provider_extras(shoot: &Shoot, profile: &CloudProfile) -> Result<(), AdmissionDenial> {
    let spec = &profile.spec;

    // Profiles publishing floating pools or load balancer providers require
    // the shoot to pick one of them.
    match &shoot.spec.provider.floating_pool_name {
        Some(pool) => {
            if !spec.floating_pools.iter().any(|p| p.name == *pool) {
                return Err(AdmissionDenial::forbidden(format!(
                    "floating pool {pool:?} is not available in cloud profile {:?}",
                    profile.metadata.name
                )));
            }
        }
        None => {
            if !spec.floating_pools.is_empty() {
                return Err(AdmissionDenial::forbidden(format!(
                    "cloud profile {:?} requires a floating pool name",
                    profile.metadata.name
                )));
            }
        }
    }

    match &shoot.spec.provider.load_balancer_provider {
        Some(provider) => {
            if !spec
                .load_balancer_providers
                .iter()
                .any(|p| p.name == *provider)
            {
                return Err(AdmissionDenial::forbidden(format!(
                    "load balancer provider {provider:?} is not available in cloud profile {:?}",
                    profile.metadata.name
                )));
            }
        }
        None => {
            if !spec.load_balancer_providers.is_empty() {
                return Err(AdmissionDenial::forbidden(format!(
                    "cloud profile {:?} requires a load balancer provider",
                    profile.metadata.name
                )));
            }
        }
    }

    // Providers with placement domains publish per-region counts; a shoot
    // region lacking either count cannot be provisioned.
    if spec.has_domain_counted_regions() {
        if let Some(region) = spec.region(&shoot.spec.region) {
            if region.fault_domain_count.is_none() {
                return Err(AdmissionDenial::forbidden(format!(
                    "no fault domain count known for region {:?}",
                    region.name
                )));
            }
            if region.update_domain_count.is_none() {
                return Err(AdmissionDenial::forbidden(format!(
                    "no update domain count known for region {:?}",
                    region.name
                )));
            }
        }
    }

    Ok(())
}

/// Case-insensitive domain collision: equal, parent, or subdomain with a
/// `.` boundary.
fn domains_overlap(a: &str, b: &str) -> bool {
    let a = a.trim_end_matches('.').to_ascii_lowercase();
    let b = b.trim_end_matches('.').to_ascii_lowercase();
    a == b || a.ends_with(&format!(".{b}")) || b.ends_with(&format!(".{a}"))
}
