//! compute / database / serverless / orchestrator nodes

use super::{children, int_arg, positional, secret_arg, string_arg, unknown_child};
use crate::error::{Result, StackError};
use crate::model::{ComputeConfig, DatabaseConfig, ServerlessConfig};
use crate::orchestrator::OrchestratorConfig;
use kdl::KdlNode;
use tierflow_cloud::ImageFilter;

pub fn parse_compute(node: &KdlNode, compute: &mut ComputeConfig) -> Result<()> {
    // The first image setting replaces the default filter
    let mut image: Option<ImageFilter> = None;

    for child in children(node) {
        match child.name().value() {
            "instance-class" | "instance_class" => compute.instance_class = string_arg(child)?,
            "image-owner" | "image_owner" => {
                let filter = image.get_or_insert_with(ImageFilter::default);
                filter.owners.push(string_arg(child)?);
            }
            "image-filter" | "image_filter" => {
                let mut values = positional(child).filter_map(|v| v.as_string());
                let name = values.next().ok_or_else(|| {
                    StackError::Configuration("image-filter requires a name".to_string())
                })?;
                let patterns: Vec<String> = values.map(str::to_string).collect();
                if patterns.is_empty() {
                    return Err(StackError::Configuration(format!(
                        "image-filter \"{}\" requires at least one pattern",
                        name
                    )));
                }
                let filter = image.get_or_insert_with(ImageFilter::default);
                filter
                    .filters
                    .entry(name.to_string())
                    .or_default()
                    .extend(patterns);
            }
            "min-size" | "min_size" => compute.min_size = int_arg(child)?,
            "max-size" | "max_size" => compute.max_size = int_arg(child)?,
            "desired-capacity" | "desired_capacity" => {
                compute.desired_capacity = Some(int_arg(child)?)
            }
            "app-port" | "app_port" => compute.app_port = int_arg(child)?,
            "bootstrap" => compute.bootstrap = string_arg(child)?,
            "key-name" | "key_name" => compute.key_name = Some(string_arg(child)?),
            _ => unknown_child("compute", child),
        }
    }

    if let Some(image) = image {
        compute.image = image;
    }
    Ok(())
}

pub fn parse_database(node: &KdlNode, database: &mut DatabaseConfig) -> Result<()> {
    for child in children(node) {
        match child.name().value() {
            "engine" => database.engine = string_arg(child)?,
            "version" => database.version = version_arg(child)?,
            "instance-class" | "instance_class" => database.instance_class = string_arg(child)?,
            "name" => database.name = string_arg(child)?,
            "username" => database.username = secret_arg(child)?,
            "password" => database.password = Some(secret_arg(child)?),
            "port" => database.port = int_arg(child)?,
            "storage" | "storage-gb" => database.storage_gb = int_arg(child)?,
            _ => unknown_child("database", child),
        }
    }
    Ok(())
}

/// Versions may be written as `"15"` or `15`
fn version_arg(node: &KdlNode) -> Result<String> {
    match positional(node).next() {
        Some(value) if value.as_integer().is_some() => Ok(value.to_string()),
        _ => string_arg(node),
    }
}

pub fn parse_serverless(node: &KdlNode) -> Result<ServerlessConfig> {
    let mut serverless = ServerlessConfig::default();
    for child in children(node) {
        match child.name().value() {
            "runtime" => serverless.runtime = string_arg(child)?,
            "handler" => serverless.handler = string_arg(child)?,
            "schedule" => serverless.schedule = string_arg(child)?,
            "memory" | "memory-mb" => serverless.memory_mb = int_arg(child)?,
            "timeout" | "timeout-secs" => serverless.timeout_secs = int_arg(child)?,
            _ => unknown_child("serverless", child),
        }
    }
    Ok(serverless)
}

pub fn parse_orchestrator(node: &KdlNode, orchestrator: &mut OrchestratorConfig) -> Result<()> {
    for child in children(node) {
        match child.name().value() {
            "concurrency" => orchestrator.concurrency = int_arg(child)?,
            "failure-policy" | "failure_policy" => {
                orchestrator.failure_policy = string_arg(child)?.parse()?
            }
            _ => unknown_child("orchestrator", child),
        }
    }
    Ok(())
}
