//! Network settings: address space, zones, ingress rules

use crate::address::{AddressBlock, Tier, ZonePolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_SUBNET_PREFIX: u8 = 24;
pub const DEFAULT_ZONES: usize = 2;

/// Address space and zone spread of the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Parent block of the VPC
    pub cidr: AddressBlock,

    /// Prefix length of every subnet, independent of the parent's
    pub subnet_prefix: u8,

    /// Requested number of availability zones
    pub zones: usize,

    pub zone_policy: ZonePolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: AddressBlock::DEFAULT_VPC,
            subnet_prefix: DEFAULT_SUBNET_PREFIX,
            zones: DEFAULT_ZONES,
            zone_policy: ZonePolicy::default(),
        }
    }
}

/// One inbound rule of a tier's security group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    /// "tcp", "udp", "icmp" or "-1" for all traffic
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub sources: Vec<String>,
}

impl IngressRule {
    pub fn new(protocol: impl Into<String>, from_port: u16, to_port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            from_port,
            to_port,
            sources: Vec::new(),
        }
    }

    /// TCP on a single port from anywhere
    pub fn tcp(port: u16) -> Self {
        Self::new("tcp", port, port).from_source("0.0.0.0/0")
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }
}

/// Ingress rules per tier
pub type IngressRules = BTreeMap<Tier, Vec<IngressRule>>;

/// SSH, HTTP, HTTPS and the app port open on the public tier
pub fn default_ingress() -> IngressRules {
    BTreeMap::from([(
        Tier::Public,
        [22, 80, 443, 8080].into_iter().map(IngressRule::tcp).collect(),
    )])
}
