//! KDL parser
//!
//! Parses a stack file into a [`StackConfig`]. Each top-level section has
//! its own parse function; unknown nodes are reported and ignored.

mod compute;
mod network;


use compute::{parse_compute, parse_database, parse_orchestrator, parse_serverless};
use network::{parse_ingress, parse_network};

use crate::error::{Result, StackError};
use crate::model::StackConfig;
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Prefix of values read from the environment (`password "env:DB_PASSWORD"`)
pub const ENV_PREFIX: &str = "env:";

/// Parse a stack file
///
/// The stack name defaults to the name of the directory holding the file.
pub fn parse_stack_file<P: AsRef<Path>>(path: P) -> Result<StackConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| StackError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let doc: KdlDocument = content.parse()?;
    let mut config = parse_stack_document(&doc)?;

    let named = doc.nodes().iter().any(|n| n.name().value() == "stack");
    if !named
        && let Some(name) = path
            .canonicalize()
            .ok()
            .as_deref()
            .and_then(Path::parent)
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
    {
        config.name = name.to_string();
    }
    Ok(config)
}

/// Parse stack settings from a KDL string
pub fn parse_stack_str(content: &str) -> Result<StackConfig> {
    let doc: KdlDocument = content.parse()?;
    parse_stack_document(&doc)
}

fn parse_stack_document(doc: &KdlDocument) -> Result<StackConfig> {
    let mut config = StackConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "stack" => config.name = string_arg(node)?,
            "region" => config.region = string_arg(node)?,
            "domain" => config.domain = Some(string_arg(node)?),
            "network" => parse_network(node, &mut config.network)?,
            "ingress" => {
                let (tier, rules) = parse_ingress(node)?;
                config.ingress.insert(tier, rules);
            }
            "compute" => parse_compute(node, &mut config.compute)?,
            "database" => parse_database(node, &mut config.database)?,
            "serverless" => config.serverless = Some(parse_serverless(node)?),
            "orchestrator" => parse_orchestrator(node, &mut config.orchestrator)?,
            other => warn!(node = other, "Ignoring unknown stack setting"),
        }
    }

    Ok(config)
}

/// Positional (unnamed) values of a node
pub(crate) fn positional(node: &KdlNode) -> impl Iterator<Item = &KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| e.value())
}

/// First positional value as a string
pub(crate) fn string_arg(node: &KdlNode) -> Result<String> {
    positional(node)
        .next()
        .and_then(|v| v.as_string())
        .map(str::to_string)
        .ok_or_else(|| {
            StackError::Configuration(format!("{} requires a string value", node.name().value()))
        })
}

/// First positional value as an integer of type `T`
pub(crate) fn int_arg<T: TryFrom<i128>>(node: &KdlNode) -> Result<T> {
    let name = node.name().value();
    let value = positional(node)
        .next()
        .and_then(|v| v.as_integer())
        .ok_or_else(|| StackError::Configuration(format!("{} requires an integer value", name)))?;
    T::try_from(value)
        .map_err(|_| StackError::Configuration(format!("{} value {} is out of range", name, value)))
}

/// String value that may name an environment variable instead
pub(crate) fn secret_arg(node: &KdlNode) -> Result<String> {
    let value = string_arg(node)?;
    match value.strip_prefix(ENV_PREFIX) {
        Some(var) => std::env::var(var).map_err(|_| {
            StackError::Configuration(format!(
                "{} refers to environment variable {} which is not set",
                node.name().value(),
                var
            ))
        }),
        None => Ok(value),
    }
}

/// Child nodes of a section, empty when the section has no block
pub(crate) fn children(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|doc| doc.nodes()).unwrap_or_default()
}

pub(crate) fn unknown_child(section: &str, child: &KdlNode) {
    warn!(
        section,
        setting = child.name().value(),
        "Ignoring unknown setting"
    );
}
