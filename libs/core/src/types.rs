//! Shoots, seeds, cloud profiles, and projects.

use serde::{Deserialize, Serialize};
use verdant_netcheck::Cidr;
use verdant_selector::LabelSelector;

use crate::meta::{ObjectKey, ObjectMeta};
use crate::version::{ExpirableVersion, Version};

/// Namespace reserved for operator-owned shoots.
pub const GARDEN_NAMESPACE: &str = "garden";

/// Taint restricting a seed to shoots in the garden namespace.
pub const TAINT_PROTECTED: &str = "seed.verdant.dev/protected";

/// Taint excluding a seed from automatic selection.
pub const TAINT_INVISIBLE: &str = "seed.verdant.dev/invisible";

/// Condition type reported by a seed's availability checks.
pub const CONDITION_SEED_AVAILABLE: &str = "Available";

// =============================================================================
// Shoot
// =============================================================================

/// A tenant-facing managed Kubernetes cluster, described declaratively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shoot {
    pub metadata: ObjectMeta,
    pub spec: ShootSpec,
}

impl Shoot {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootSpec {
    pub cloud_profile_name: String,
    pub region: String,
    pub provider: ShootProvider,
    pub secret_binding_name: String,

    /// The hosting seed; set by the scheduler when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,

    pub networking: ShootNetworking,
    pub kubernetes: Kubernetes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootProvider {
    /// Must match the referenced cloud profile's type.
    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(default)]
    pub workers: Vec<Worker>,

    /// Providers with floating IP pools require one of the profile's pools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_pool_name: Option<String>,

    /// Providers with managed load balancers require one of the profile's
    /// published providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_provider: Option<String>,
}

/// A homogeneous group of worker nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub name: String,
    pub machine: Machine,
    pub minimum: u32,
    pub maximum: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<WorkerVolume>,

    #[serde(default)]
    pub zones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    #[serde(rename = "type")]
    pub machine_type: String,

    /// Absent images are defaulted downstream of admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<MachineImageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineImageRef {
    pub name: String,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerVolume {
    #[serde(rename = "type")]
    pub volume_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dns {
    /// Fully-qualified external domain, unique across all shoots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootNetworking {
    pub nodes: Cidr,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods: Option<Cidr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Cidr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kubernetes {
    pub version: Version,
}

// =============================================================================
// Seed
// =============================================================================

/// A hosting cluster that runs the control planes of zero or more shoots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub metadata: ObjectMeta,
    pub spec: SeedSpec,

    #[serde(default)]
    pub status: SeedStatus,
}

impl Seed {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn has_taint(&self, key: &str) -> bool {
        self.spec.taints.iter().any(|taint| taint.key == key)
    }

    /// True when the `Available` condition is reported `True`.
    pub fn is_available(&self) -> bool {
        get_condition(&self.status.conditions, CONDITION_SEED_AVAILABLE)
            .map_or(false, |condition| condition.status == ConditionStatus::True)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedSpec {
    pub provider: SeedProvider,
    pub networks: SeedNetworks,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<SeedTaint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedProvider {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedNetworks {
    pub nodes: Cidr,
    pub pods: Cidr,
    pub services: Cidr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedTaint {
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Find a condition by type.
pub fn get_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|condition| condition.condition_type == condition_type)
}

// =============================================================================
// CloudProfile
// =============================================================================

/// The catalog of allowed versions, machine types, volume types, regions,
/// and zones for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudProfile {
    pub metadata: ObjectMeta,
    pub spec: CloudProfileSpec,
}

impl CloudProfile {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudProfileSpec {
    #[serde(rename = "type")]
    pub provider_type: String,

    pub kubernetes: KubernetesSettings,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machine_images: Vec<MachineImage>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machine_types: Vec<MachineType>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_types: Vec<VolumeType>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<Region>,

    /// Restricts which seeds may host shoots of this profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub floating_pools: Vec<NamedResource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_balancer_providers: Vec<NamedResource>,
}

impl CloudProfileSpec {
    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|region| region.name == name)
    }

    pub fn machine_type(&self, name: &str) -> Option<&MachineType> {
        self.machine_types.iter().find(|machine| machine.name == name)
    }

    pub fn volume_type(&self, name: &str) -> Option<&VolumeType> {
        self.volume_types.iter().find(|volume| volume.name == name)
    }

    /// Look up a published machine image version by `(name, version)`.
    pub fn machine_image_version(&self, name: &str, version: &Version) -> Option<&ExpirableVersion> {
        self.machine_images
            .iter()
            .find(|image| image.name == name)?
            .versions
            .iter()
            .find(|published| published.version == *version)
    }

    /// True when any region publishes fault/update domain counts.
    pub fn has_domain_counted_regions(&self) -> bool {
        self.regions
            .iter()
            .any(|region| region.fault_domain_count.is_some() || region.update_domain_count.is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<ExpirableVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineImage {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<ExpirableVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineType {
    pub name: String,
    pub cpu: String,
    pub gpu: String,
    pub memory: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,

    /// `Some(false)` withdraws the type from new shoots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usable: Option<bool>,
}

impl MachineType {
    pub fn is_usable(&self) -> bool {
        self.usable.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeType {
    pub name: String,
    pub class: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usable: Option<bool>,
}

impl VolumeType {
    pub fn is_usable(&self) -> bool {
        self.usable.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<Zone>,

    /// Providers with placement domains publish per-region counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_domain_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_domain_count: Option<u32>,
}

impl Region {
    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable_machine_types: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable_volume_types: Vec<String>,
}

/// A provider resource identified only by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedResource {
    pub name: String,
}

// =============================================================================
// Project
// =============================================================================

/// The administrative grouping owning a namespace into which shoots are
/// placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub metadata: ObjectMeta,
    pub spec: ProjectSpec,
}

impl Project {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// The namespace containing the project's shoots.
    pub namespace: String,
}
