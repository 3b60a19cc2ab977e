//! Provisioning engine trait definition

use crate::action::Applied;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// External provisioning engine
///
/// The engine owns credentials, state persistence and the wire protocol to
/// the cloud. TierFlow only asks it to create resources and to answer a few
/// environment queries. `create` must be idempotent: asking for a resource
/// that already matches the request returns its attributes with
/// [`crate::ActionType::NoOp`].
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    /// Returns the engine name (e.g., "local", "command")
    fn name(&self) -> &str;

    /// Create (or converge) one resource and return its attributes
    async fn create(&self, request: &CreateRequest) -> Result<Applied>;

    /// Availability zones of a region, in the engine's preferred order
    async fn availability_zones(&self, region: &str) -> Result<Vec<String>>;

    /// Identifier of the newest image matching the filter
    async fn latest_image(&self, filter: &ImageFilter) -> Result<String>;
}

/// A single create request with every deferred value already substituted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Logical resource name, unique within a run
    pub name: String,

    /// Resource kind (e.g., "ec2:vpc", "rds:instance")
    pub kind: String,

    /// Fully resolved properties
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Get the full resource key (kind:name)
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }

    /// Get a property value as a specific type
    pub fn get_property<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.properties
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Image lookup filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFilter {
    /// Image owners (e.g., "amazon")
    pub owners: Vec<String>,

    /// Attribute filters; every filter must match one of its patterns
    pub filters: BTreeMap<String, Vec<String>>,
}

impl ImageFilter {
    pub fn new(owners: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            owners: owners.into_iter().map(Into::into).collect(),
            filters: BTreeMap::new(),
        }
    }

    pub fn with_filter(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filters
            .entry(name.into())
            .or_default()
            .push(pattern.into());
        self
    }
}

impl std::fmt::Display for ImageFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "owners=[{}]", self.owners.join(","))?;
        for (name, patterns) in &self.filters {
            write!(f, " {}=[{}]", name, patterns.join(","))?;
        }
        Ok(())
    }
}

/// Retry configuration for engine calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay to wait after the given (zero-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
