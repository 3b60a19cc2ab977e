//! network / ingress nodes

use super::{children, int_arg, positional, string_arg, unknown_child};
use crate::address::{AddressBlock, Tier};
use crate::error::{Result, StackError};
use crate::model::{IngressRule, NetworkConfig};
use kdl::KdlNode;

pub fn parse_network(node: &KdlNode, network: &mut NetworkConfig) -> Result<()> {
    for child in children(node) {
        match child.name().value() {
            "cidr" => network.cidr = string_arg(child)?.parse::<AddressBlock>()?,
            "subnet-mask" | "subnet_mask" => network.subnet_prefix = int_arg(child)?,
            "zones" => network.zones = int_arg(child)?,
            "zone-policy" | "zone_policy" => network.zone_policy = string_arg(child)?.parse()?,
            _ => unknown_child("network", child),
        }
    }
    Ok(())
}

/// `ingress "public" { rule "tcp" 80 80 "0.0.0.0/0" }`
///
/// The upper port is optional; sources default to anywhere.
pub fn parse_ingress(node: &KdlNode) -> Result<(Tier, Vec<IngressRule>)> {
    let tier: Tier = string_arg(node)?.parse()?;

    let mut rules = Vec::new();
    for child in children(node) {
        match child.name().value() {
            "rule" => rules.push(parse_rule(child, tier)?),
            _ => unknown_child("ingress", child),
        }
    }
    Ok((tier, rules))
}

fn parse_rule(node: &KdlNode, tier: Tier) -> Result<IngressRule> {
    let invalid = |message: &str| {
        StackError::Configuration(format!("{} ingress rule: {}", tier, message))
    };
    let port = |value: i128| u16::try_from(value).map_err(|_| invalid("port out of range"));

    let mut values = positional(node).peekable();
    let protocol = values
        .next()
        .and_then(|v| v.as_string())
        .ok_or_else(|| invalid("protocol is required"))?
        .to_string();
    let from_port = port(
        values
            .next()
            .and_then(|v| v.as_integer())
            .ok_or_else(|| invalid("port is required"))?,
    )?;
    let to_port = match values.peek().and_then(|v| v.as_integer()) {
        Some(value) => {
            values.next();
            port(value)?
        }
        None => from_port,
    };

    let mut rule = IngressRule::new(protocol, from_port, to_port);
    for value in values {
        let source = value
            .as_string()
            .ok_or_else(|| invalid("sources must be CIDR strings"))?;
        rule = rule.from_source(source);
    }
    if rule.sources.is_empty() {
        rule = rule.from_source("0.0.0.0/0");
    }
    Ok(rule)
}
