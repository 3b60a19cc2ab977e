//! Subnet address planning
//!
//! Derives one public and one private subnet per availability zone from a
//! parent CIDR block. Public subnets take indices `0..zones`, private subnets
//! `zones..2*zones`; for a `/16` parent carved into `/24`s this is the third
//! octet. The result is a plain value returned to the caller, no global
//! accumulator is involved.

use crate::error::{Result, StackError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use tracing::warn;

/// CIDR block: base network address plus prefix length
///
/// Invariants: prefix ≤ 32 (IPv4) or ≤ 128 (IPv6), and no host bits set in
/// the base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressBlock {
    network: IpAddr,
    prefix: u8,
}

impl AddressBlock {
    /// `10.0.0.0/16`
    pub const DEFAULT_VPC: AddressBlock = AddressBlock {
        network: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)),
        prefix: 16,
    };

    pub fn new(network: IpAddr, prefix: u8) -> Result<Self> {
        let block = Self { network, prefix };
        if prefix > block.bits() {
            return Err(StackError::Configuration(format!(
                "prefix length /{} is out of range for {}",
                prefix, network
            )));
        }
        if block.base() & block.host_mask() != 0 {
            return Err(StackError::Configuration(format!(
                "{}/{} is not aligned to its prefix",
                network, prefix
            )));
        }
        Ok(block)
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn is_ipv4(&self) -> bool {
        self.network.is_ipv4()
    }

    /// Address width in bits (32 or 128)
    fn bits(&self) -> u8 {
        match self.network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    fn base(&self) -> u128 {
        match self.network {
            IpAddr::V4(v4) => u128::from(u32::from(v4)),
            IpAddr::V6(v6) => u128::from(v6),
        }
    }

    fn host_mask(&self) -> u128 {
        let host_bits = u32::from(self.bits() - self.prefix);
        1u128.checked_shl(host_bits).map_or(u128::MAX, |v| v - 1)
    }

    fn last(&self) -> u128 {
        self.base() | self.host_mask()
    }

    fn from_base(&self, value: u128, prefix: u8) -> Self {
        let network = match self.network {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(value as u32)),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(value)),
        };
        Self { network, prefix }
    }

    /// Whether `other` lies entirely inside this block
    pub fn contains(&self, other: &AddressBlock) -> bool {
        self.is_ipv4() == other.is_ipv4()
            && other.prefix >= self.prefix
            && other.base() >= self.base()
            && other.last() <= self.last()
    }

    /// Whether the two blocks share at least one address
    pub fn overlaps(&self, other: &AddressBlock) -> bool {
        self.is_ipv4() == other.is_ipv4()
            && self.base() <= other.last()
            && other.base() <= self.last()
    }

    /// How many `/prefix` blocks fit in this block (saturating)
    pub fn capacity(&self, prefix: u8) -> u128 {
        if prefix < self.prefix || prefix > self.bits() {
            return 0;
        }
        1u128
            .checked_shl(u32::from(prefix - self.prefix))
            .unwrap_or(u128::MAX)
    }

    /// The `index`-th `/prefix` block inside this one
    pub fn subnet(&self, prefix: u8, index: u128) -> Result<AddressBlock> {
        if index >= self.capacity(prefix) {
            return Err(StackError::AddressSpaceExhausted {
                parent: self.to_string(),
                prefix,
                requested: index.saturating_add(1),
                available: self.capacity(prefix),
            });
        }
        let shift = u32::from(self.bits() - prefix);
        let offset = index.checked_shl(shift).unwrap_or(0);
        Ok(self.from_base(self.base() + offset, prefix))
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for AddressBlock {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| StackError::Configuration(format!("'{}' is not CIDR notation", s)))?;
        let network = IpAddr::from_str(addr)
            .map_err(|_| StackError::Configuration(format!("invalid address '{}'", addr)))?;
        let prefix = prefix
            .parse::<u8>()
            .map_err(|_| StackError::Configuration(format!("invalid prefix length '{}'", prefix)))?;
        Self::new(network, prefix)
    }
}

impl TryFrom<String> for AddressBlock {
    type Error = StackError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AddressBlock> for String {
    fn from(block: AddressBlock) -> Self {
        block.to_string()
    }
}

/// Subnet tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Externally reachable
    Public,
    /// Internal only
    Private,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Public, Tier::Private];
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Public => write!(f, "public"),
            Tier::Private => write!(f, "private"),
        }
    }
}

impl FromStr for Tier {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "public" => Ok(Tier::Public),
            "private" => Ok(Tier::Private),
            other => Err(StackError::Configuration(format!(
                "unknown tier '{}' (expected public or private)",
                other
            ))),
        }
    }
}

/// One planned subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub zone_index: usize,
    pub tier: Tier,
    pub block: AddressBlock,
}

/// Ordered subnets: all public subnets by zone, then all private subnets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetPlan {
    pub parent: AddressBlock,
    pub subnets: Vec<Subnet>,
}

impl SubnetPlan {
    pub fn len(&self) -> usize {
        self.subnets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subnets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subnet> {
        self.subnets.iter()
    }

    pub fn by_tier(&self, tier: Tier) -> impl Iterator<Item = &Subnet> {
        self.subnets.iter().filter(move |s| s.tier == tier)
    }

    pub fn zone_count(&self) -> usize {
        self.by_tier(Tier::Public).count()
    }
}

/// Compute `2 × zone_count` subnets of `/prefix` inside `parent`
pub fn plan(parent: &AddressBlock, zone_count: usize, prefix: u8) -> Result<SubnetPlan> {
    if zone_count == 0 {
        return Err(StackError::Configuration(
            "at least one availability zone is required".to_string(),
        ));
    }
    if prefix > parent.bits() {
        return Err(StackError::Configuration(format!(
            "subnet prefix /{} is out of range for {}",
            prefix, parent
        )));
    }

    let requested = (zone_count as u128) * 2;
    let available = parent.capacity(prefix);
    if requested > available {
        return Err(StackError::AddressSpaceExhausted {
            parent: parent.to_string(),
            prefix,
            requested,
            available,
        });
    }

    let mut subnets = Vec::with_capacity(zone_count * 2);
    for (offset, tier) in Tier::ALL.iter().enumerate() {
        for zone_index in 0..zone_count {
            let index = (offset * zone_count + zone_index) as u128;
            subnets.push(Subnet {
                zone_index,
                tier: *tier,
                block: parent.subnet(prefix, index)?,
            });
        }
    }

    Ok(SubnetPlan {
        parent: *parent,
        subnets,
    })
}

/// What to do when the region offers fewer zones than requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZonePolicy {
    /// Use the zones that exist
    #[default]
    Degrade,
    /// Refuse to plan
    Strict,
}

impl FromStr for ZonePolicy {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "degrade" => Ok(ZonePolicy::Degrade),
            "strict" => Ok(ZonePolicy::Strict),
            other => Err(StackError::Configuration(format!(
                "unknown zone policy '{}' (expected degrade or strict)",
                other
            ))),
        }
    }
}

impl fmt::Display for ZonePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZonePolicy::Degrade => write!(f, "degrade"),
            ZonePolicy::Strict => write!(f, "strict"),
        }
    }
}

/// Pick the zones to spread subnets over
///
/// Zero available zones is always fatal. With [`ZonePolicy::Degrade`] a
/// shortfall silently shrinks the zone count.
pub fn select_zones(
    requested: usize,
    available: &[String],
    policy: ZonePolicy,
) -> Result<Vec<String>> {
    if requested == 0 {
        return Err(StackError::Configuration(
            "zone count must be at least 1".to_string(),
        ));
    }
    if available.is_empty() {
        return Err(StackError::Configuration(
            "the region reports no availability zones".to_string(),
        ));
    }
    if available.len() < requested {
        match policy {
            ZonePolicy::Degrade => {
                warn!(
                    requested,
                    available = available.len(),
                    "Fewer availability zones than requested, using what exists"
                );
            }
            ZonePolicy::Strict => {
                return Err(StackError::Configuration(format!(
                    "{} availability zones requested but only {} available",
                    requested,
                    available.len()
                )));
            }
        }
    }

    Ok(available.iter().take(requested).cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(s: &str) -> AddressBlock {
        s.parse().unwrap()
    }

    fn zones(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("us-east-1{}", (b'a' + i as u8) as char)).collect()
    }

    #[test]
    fn test_parse_and_display() {
        let parent = block("10.0.0.0/16");
        assert_eq!(parent.to_string(), "10.0.0.0/16");
        assert_eq!(parent.prefix(), 16);
        assert!(parent.is_ipv4());
    }

    #[test]
    fn test_rejects_malformed_blocks() {
        assert!(matches!(
            "10.0.0.0".parse::<AddressBlock>(),
            Err(StackError::Configuration(_))
        ));
        assert!("10.0.0.0/33".parse::<AddressBlock>().is_err());
        assert!("10.0.1.0/16".parse::<AddressBlock>().is_err());
        assert!("nonsense/8".parse::<AddressBlock>().is_err());
    }

    #[test]
    fn test_three_zones_in_slash_16() {
        let plan = plan(&block("10.0.0.0/16"), 3, 24).unwrap();

        assert_eq!(plan.len(), 6);
        assert_eq!(plan.by_tier(Tier::Public).count(), 3);
        assert_eq!(plan.by_tier(Tier::Private).count(), 3);

        let cidrs: Vec<String> = plan.iter().map(|s| s.block.to_string()).collect();
        assert_eq!(
            cidrs,
            vec![
                "10.0.0.0/24",
                "10.0.1.0/24",
                "10.0.2.0/24",
                "10.0.3.0/24",
                "10.0.4.0/24",
                "10.0.5.0/24",
            ]
        );
        let private_zones: Vec<usize> = plan.by_tier(Tier::Private).map(|s| s.zone_index).collect();
        assert_eq!(private_zones, vec![0, 1, 2]);
    }

    #[test]
    fn test_subnets_are_disjoint_and_contained() {
        let cases = [
            ("10.0.0.0/16", 3, 24),
            ("10.0.0.0/16", 4, 20),
            ("172.16.0.0/12", 6, 16),
            ("192.168.0.0/24", 2, 26),
            ("10.20.0.0/16", 1, 17),
            ("fd00::/48", 3, 64),
        ];

        for (parent, zone_count, prefix) in cases {
            let parent = block(parent);
            let plan = plan(&parent, zone_count, prefix).unwrap();
            assert_eq!(plan.len(), zone_count * 2);

            for (i, a) in plan.iter().enumerate() {
                assert!(parent.contains(&a.block), "{} not in {}", a.block, parent);
                assert_eq!(a.block.prefix(), prefix);
                for b in plan.iter().skip(i + 1) {
                    assert!(!a.block.overlaps(&b.block), "{} overlaps {}", a.block, b.block);
                }
            }
        }
    }

    #[test]
    fn test_address_space_exhausted() {
        // A /23 holds only two /24s
        let result = plan(&block("10.0.0.0/23"), 2, 24);
        assert!(matches!(
            result,
            Err(StackError::AddressSpaceExhausted {
                requested: 4,
                available: 2,
                ..
            })
        ));

        // Subnet larger than parent
        assert!(matches!(
            plan(&block("10.0.0.0/24"), 1, 16),
            Err(StackError::AddressSpaceExhausted { available: 0, .. })
        ));
    }

    #[test]
    fn test_zero_zones_is_configuration_error() {
        assert!(matches!(
            plan(&block("10.0.0.0/16"), 0, 24),
            Err(StackError::Configuration(_))
        ));
    }

    #[test]
    fn test_overlap_and_contains() {
        let a = block("10.0.0.0/16");
        let b = block("10.0.4.0/24");
        let c = block("10.1.0.0/16");

        assert!(a.contains(&b));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(!b.contains(&a));
        assert!(!a.overlaps(&block("fd00::/8")));
    }

    #[test]
    fn test_select_zones_degrades() {
        let selected = select_zones(3, &zones(2), ZonePolicy::Degrade).unwrap();
        assert_eq!(selected.len(), 2);

        let plan = plan(&block("10.0.0.0/16"), selected.len(), 24).unwrap();
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn test_select_zones_strict() {
        assert!(matches!(
            select_zones(3, &zones(2), ZonePolicy::Strict),
            Err(StackError::Configuration(_))
        ));
        assert_eq!(
            select_zones(2, &zones(3), ZonePolicy::Strict).unwrap(),
            vec!["us-east-1a", "us-east-1b"]
        );
    }

    #[test]
    fn test_select_zones_none_available() {
        assert!(matches!(
            select_zones(3, &[], ZonePolicy::Degrade),
            Err(StackError::Configuration(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&block("10.0.0.0/16")).unwrap();
        assert_eq!(json, "\"10.0.0.0/16\"");

        let parsed: AddressBlock = serde_json::from_str("\"10.1.0.0/16\"").unwrap();
        assert_eq!(parsed, block("10.1.0.0/16"));
        assert!(serde_json::from_str::<AddressBlock>("\"10.1.0.1/16\"").is_err());
    }
}
