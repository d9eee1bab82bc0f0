//! Network range checks for cluster scheduling.
//!
//! This library provides helpers for:
//! - Parsing CIDR blocks (IPv4 and IPv6)
//! - Overlap detection at the IP-arithmetic level
//! - Disjointness validation between a seed's networks and a shoot's networks

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Network check errors.
#[derive(Debug, Error)]
pub enum NetError {
    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid CIDR prefix.
    #[error("invalid CIDR prefix: {0}")]
    InvalidPrefix(String),

    /// Address family mismatch between prefix length and address.
    #[error("prefix length {len} exceeds maximum for {family}")]
    PrefixTooLong { len: u8, family: &'static str },
}

// ============================================================================
// CIDR
// ============================================================================

/// An IPv4 or IPv6 network in CIDR notation.
///
/// The address is always stored masked to the prefix length, so two equal
/// `Cidr` values describe the same network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    address: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    /// Create a new CIDR, masking the address to the prefix.
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, NetError> {
        let max = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(NetError::PrefixTooLong {
                len: prefix_len,
                family: if max == 32 { "IPv4" } else { "IPv6" },
            });
        }

        Ok(Self {
            address: mask(address, prefix_len),
            prefix_len,
        })
    }

    /// The masked network address.
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// The prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check if an address is within this network.
    pub fn contains(&self, addr: IpAddr) -> bool {
        same_family(self.address, addr) && mask(addr, self.prefix_len) == self.address
    }

    /// Check whether two networks share any address.
    ///
    /// Networks of different address families never overlap. Otherwise the
    /// larger prefix (smaller length) contains the smaller one's network
    /// address iff the ranges intersect.
    pub fn overlaps(&self, other: &Cidr) -> bool {
        if !same_family(self.address, other.address) {
            return false;
        }

        if self.prefix_len <= other.prefix_len {
            mask(other.address, self.prefix_len) == self.address
        } else {
            mask(self.address, other.prefix_len) == other.address
        }
    }
}

impl FromStr for Cidr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((addr_str, prefix_str)) = s.split_once('/') else {
            return Err(NetError::InvalidPrefix(format!("missing '/' in CIDR: {s}")));
        };

        let address = IpAddr::from_str(addr_str)
            .map_err(|_| NetError::InvalidAddress(addr_str.to_string()))?;

        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| NetError::InvalidPrefix(prefix_str.to_string()))?;

        Self::new(address, prefix_len)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn same_family(a: IpAddr, b: IpAddr) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

/// Mask an address to a prefix length.
fn mask(addr: IpAddr, prefix_len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from_be_bytes(v4.octets());
            let mask = if prefix_len == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix_len.min(32)))
            };
            IpAddr::from((bits & mask).to_be_bytes())
        }
        IpAddr::V6(v6) => {
            let bits = u128::from_be_bytes(v6.octets());
            let mask = if prefix_len == 0 {
                0
            } else {
                u128::MAX << (128 - u128::from(prefix_len.min(128)))
            };
            IpAddr::from((bits & mask).to_be_bytes())
        }
    }
}

// ============================================================================
// Disjointness validation
// ============================================================================

/// A detected overlap between a seed network and a shoot network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkViolation {
    /// Which network pair overlaps ("nodes", "pods", "services").
    pub field: &'static str,
    /// The seed's network.
    pub seed_network: Cidr,
    /// The shoot's network.
    pub shoot_network: Cidr,
}

impl fmt::Display for NetworkViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shoot {} network {} intersects seed {} network {}",
            self.field, self.shoot_network, self.field, self.seed_network
        )
    }
}

/// Validate that a seed's networks are pairwise disjoint from a shoot's.
///
/// Absent shoot pod/service networks skip the corresponding pair. Returns
/// every violation found, empty when the networks are disjoint.
pub fn validate_network_disjointedness(
    seed_nodes: &Cidr,
    seed_pods: &Cidr,
    seed_services: &Cidr,
    shoot_nodes: &Cidr,
    shoot_pods: Option<&Cidr>,
    shoot_services: Option<&Cidr>,
) -> Vec<NetworkViolation> {
    let mut violations = Vec::new();

    if seed_nodes.overlaps(shoot_nodes) {
        violations.push(NetworkViolation {
            field: "nodes",
            seed_network: *seed_nodes,
            shoot_network: *shoot_nodes,
        });
    }

    if let Some(pods) = shoot_pods {
        if seed_pods.overlaps(pods) {
            violations.push(NetworkViolation {
                field: "pods",
                seed_network: *seed_pods,
                shoot_network: *pods,
            });
        }
    }

    if let Some(services) = shoot_services {
        if seed_services.overlaps(services) {
            violations.push(NetworkViolation {
                field: "services",
                seed_network: *seed_services,
                shoot_network: *services,
            });
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let c = cidr("10.250.0.0/16");
        assert_eq!(c.prefix_len(), 16);
        assert_eq!(c.to_string(), "10.250.0.0/16");

        // Host bits are masked away.
        assert_eq!(cidr("10.250.3.7/16"), cidr("10.250.0.0/16"));

        let v6 = cidr("2001:db8::/32");
        assert_eq!(v6.to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("10.0.0.0".parse::<Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("2001:db8::/129".parse::<Cidr>().is_err());
        assert!("not-an-ip/8".parse::<Cidr>().is_err());
        assert!("10.0.0.0/banana".parse::<Cidr>().is_err());
    }

    #[test]
    fn test_contains() {
        let c = cidr("10.240.0.0/16");
        assert!(c.contains("10.240.12.1".parse().unwrap()));
        assert!(!c.contains("10.241.0.1".parse().unwrap()));
        assert!(!c.contains("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_overlap_v4() {
        assert!(cidr("10.0.0.0/8").overlaps(&cidr("10.250.0.0/16")));
        assert!(cidr("10.250.0.0/16").overlaps(&cidr("10.0.0.0/8")));
        assert!(cidr("10.240.0.0/16").overlaps(&cidr("10.240.0.0/16")));
        assert!(!cidr("10.240.0.0/16").overlaps(&cidr("10.241.0.0/16")));
        assert!(!cidr("100.96.0.0/11").overlaps(&cidr("10.241.128.0/17")));
    }

    #[test]
    fn test_overlap_v6() {
        assert!(cidr("2001:db8::/32").overlaps(&cidr("2001:db8:1::/48")));
        assert!(!cidr("2001:db8::/48").overlaps(&cidr("2001:db8:1::/48")));
    }

    #[test]
    fn test_overlap_family_mismatch() {
        assert!(!cidr("10.0.0.0/8").overlaps(&cidr("::/0")));
    }

    #[test]
    fn test_disjointedness_clean() {
        let violations = validate_network_disjointedness(
            &cidr("10.240.0.0/16"),
            &cidr("10.241.128.0/17"),
            &cidr("10.241.0.0/17"),
            &cidr("10.250.0.0/16"),
            Some(&cidr("100.96.0.0/11")),
            Some(&cidr("100.64.0.0/13")),
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn test_disjointedness_node_overlap() {
        let violations = validate_network_disjointedness(
            &cidr("10.240.0.0/16"),
            &cidr("10.241.128.0/17"),
            &cidr("10.241.0.0/17"),
            &cidr("10.240.0.0/16"),
            Some(&cidr("100.96.0.0/11")),
            Some(&cidr("100.64.0.0/13")),
        );
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "nodes");
    }

    #[test]
    fn test_disjointedness_optional_networks_skipped() {
        // Shoot without pod/service networks only checks the node pair.
        let violations = validate_network_disjointedness(
            &cidr("10.240.0.0/16"),
            &cidr("10.241.128.0/17"),
            &cidr("10.241.0.0/17"),
            &cidr("10.250.0.0/16"),
            None,
            None,
        );
        assert!(violations.is_empty());
    }
}
