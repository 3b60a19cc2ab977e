//! Local simulation engine
//!
//! `LocalEngine` answers every engine call without touching a cloud. It
//! assigns stable identifiers, synthesizes the attributes a real provider
//! would publish (addresses, DNS names, generated secrets) and records each
//! resource in a [`StateManager`] so that a second run reports no changes.

use crate::action::{Applied, Attributes};
use crate::engine::{CreateRequest, ImageFilter, ProvisioningEngine};
use crate::error::{CloudError, Result};
use crate::kind;
use crate::state::{ResourceRecord, StateFile, StateManager};
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::Mutex;

const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
const DEFAULT_PASSWORD_LENGTH: usize = 20;

/// An image known to the local engine
#[derive(Debug, Clone)]
pub struct LocalImage {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub description: String,
    /// Sortable creation date (YYYY-MM-DD)
    pub created: String,
}

impl LocalImage {
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        created: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            name: name.into(),
            description: description.into(),
            created: created.into(),
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "name" => Some(&self.name),
            "description" => Some(&self.description),
            "image-id" => Some(&self.id),
            _ => None,
        }
    }

    fn matches(&self, filter: &ImageFilter) -> bool {
        if !filter.owners.is_empty() && !filter.owners.iter().any(|o| o == &self.owner) {
            return false;
        }
        filter.filters.iter().all(|(name, patterns)| {
            self.field(name)
                .is_some_and(|value| patterns.iter().any(|p| glob_match(p, value)))
        })
    }
}

fn default_images() -> Vec<LocalImage> {
    vec![
        LocalImage::new(
            "ami-0a1b2c3d4e5f60001",
            "amazon",
            "amzn2-ami-hvm-2.0.20240306.2-x86_64-gp2",
            "Amazon Linux 2 AMI 2.0.20240306.2 x86_64 HVM gp2",
            "2024-03-06",
        ),
        LocalImage::new(
            "ami-0a1b2c3d4e5f60002",
            "amazon",
            "amzn2-ami-hvm-2.0.20240620.0-x86_64-gp2",
            "Amazon Linux 2 AMI 2.0.20240620.0 x86_64 HVM gp2",
            "2024-06-20",
        ),
        LocalImage::new(
            "ami-0c0d0e0f101112131",
            "canonical",
            "ubuntu/images/hvm-ssd/ubuntu-jammy-22.04-amd64-server-20240614",
            "Canonical, Ubuntu, 22.04 LTS, amd64 jammy image",
            "2024-06-14",
        ),
    ]
}

/// State-backed simulation engine
pub struct LocalEngine {
    region: String,
    zones: Vec<String>,
    images: Vec<LocalImage>,
    store: Option<StateManager>,
    state: Mutex<StateFile>,
    failures: HashSet<String>,
}

impl LocalEngine {
    /// Engine that keeps its state in memory only
    pub fn in_memory(region: impl Into<String>) -> Self {
        let region = region.into();
        let zones = ["a", "b", "c"]
            .iter()
            .map(|suffix| format!("{}{}", region, suffix))
            .collect();
        Self {
            region,
            zones,
            images: default_images(),
            store: None,
            state: Mutex::new(StateFile::default()),
            failures: HashSet::new(),
        }
    }

    /// Engine persisting its state under `<project_root>/.tierflow/`
    pub async fn open(project_root: impl AsRef<Path>, region: impl Into<String>) -> Result<Self> {
        let store = StateManager::new(project_root);
        let state = store.load().await?;
        let mut engine = Self::in_memory(region);
        engine.state = Mutex::new(state);
        engine.store = Some(store);
        Ok(engine)
    }

    /// Override the availability zones reported for the region
    pub fn with_zones(mut self, zones: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.zones = zones.into_iter().map(Into::into).collect();
        self
    }

    /// Register an additional image in the catalog
    pub fn with_image(mut self, image: LocalImage) -> Self {
        self.images.push(image);
        self
    }

    /// Make every create request for `name` fail
    pub fn with_failure(mut self, name: impl Into<String>) -> Self {
        self.failures.insert(name.into());
        self
    }

    /// Snapshot of the current state
    pub async fn snapshot(&self) -> StateFile {
        self.state.lock().await.clone()
    }

    fn generate_id(&self, request: &CreateRequest) -> String {
        let hash = fnv1a(request.key().as_bytes());
        format!("{}-{:017x}", kind::id_prefix(&request.kind), hash >> 4)
    }

    /// Attributes a real provider would publish for this resource
    fn attributes_for(&self, id: &str, request: &CreateRequest) -> Attributes {
        let mut attributes: Attributes = request.properties.clone();
        let hash = fnv1a(id.as_bytes());
        let service = request.kind.split(':').next().unwrap_or("local");

        attributes.insert("id".to_string(), json!(id));
        attributes.insert(
            "arn".to_string(),
            json!(format!("arn:tierflow:{}:{}:{}", service, self.region, id)),
        );

        match request.kind.as_str() {
            kind::INSTANCE => {
                let private_ip = format!("10.0.{}.{}", (hash >> 8) & 0xff, (hash & 0xff) % 250 + 4);
                attributes.insert("private_ip".to_string(), json!(private_ip));
                if request
                    .get_property::<bool>("associate_public_ip_address")
                    .unwrap_or(false)
                {
                    let public_ip = format!(
                        "54.{}.{}.{}",
                        (hash >> 16) & 0xff,
                        (hash >> 24) & 0xff,
                        ((hash >> 32) & 0xfd) + 1
                    );
                    attributes.insert(
                        "public_dns".to_string(),
                        json!(format!(
                            "ec2-{}.{}.compute.tierflow.internal",
                            public_ip.replace('.', "-"),
                            self.region
                        )),
                    );
                    attributes.insert("public_ip".to_string(), json!(public_ip));
                }
            }
            kind::DB_INSTANCE => {
                let port = request.get_property::<u16>("port").unwrap_or(5432);
                let address = format!(
                    "{}.{:012x}.{}.rds.tierflow.internal",
                    request.name,
                    hash & 0xffff_ffff_ffff,
                    self.region
                );
                attributes.insert("endpoint".to_string(), json!(format!("{address}:{port}")));
                attributes.insert("address".to_string(), json!(address));
                attributes.insert("port".to_string(), json!(port));
            }
            kind::LOAD_BALANCER => {
                attributes.insert(
                    "dns_name".to_string(),
                    json!(format!(
                        "{}-{:08x}.{}.elb.tierflow.internal",
                        request.name,
                        hash & 0xffff_ffff,
                        self.region
                    )),
                );
                attributes.insert("zone_id".to_string(), json!("Z35SXDOTRQ7X7K"));
            }
            kind::RANDOM_PASSWORD => {
                let length = request
                    .get_property::<usize>("length")
                    .unwrap_or(DEFAULT_PASSWORD_LENGTH);
                attributes.insert("result".to_string(), json!(generate_secret(length)));
            }
            kind::AUTOSCALING_GROUP | kind::LAUNCH_TEMPLATE | kind::TARGET_GROUP => {
                attributes
                    .entry("name".to_string())
                    .or_insert_with(|| json!(request.name));
            }
            kind::DNS_RECORD => {
                if let Some(name) = request.get_property::<String>("name") {
                    attributes.insert("fqdn".to_string(), json!(name));
                }
            }
            _ => {}
        }

        attributes
    }
}

/// A generated secret survives an update as long as its length is unchanged
fn kept_secret(record: &ResourceRecord, request: &CreateRequest) -> Option<serde_json::Value> {
    if request.kind != kind::RANDOM_PASSWORD
        || record.properties.get("length") != request.properties.get("length")
    {
        return None;
    }
    record.attributes.get("result").cloned()
}

#[async_trait]
impl ProvisioningEngine for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(&self, request: &CreateRequest) -> Result<Applied> {
        if self.failures.contains(&request.name) {
            return Err(CloudError::ApiError(format!(
                "{} {} was rejected by the engine",
                request.kind, request.name
            )));
        }

        let key = request.key();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let applied = match state.resources.get_mut(&key) {
            Some(record) if record.is_current(request) => {
                tracing::debug!(resource = %key, "Resource already up to date");
                Applied::unchanged(record.attributes.clone())
            }
            Some(record) => {
                let mut attributes = self.attributes_for(&record.id, request);
                if let Some(secret) = kept_secret(record, request) {
                    attributes.insert("result".to_string(), secret);
                }
                record.revise(request, attributes.clone());
                state.updated_at = record.updated_at;
                tracing::info!(resource = %key, id = %record.id, "Updated resource");
                Applied::updated(attributes)
            }
            None => {
                let id = self.generate_id(request);
                let attributes = self.attributes_for(&id, request);
                state.record(
                    key.clone(),
                    ResourceRecord::new(&id, request, attributes.clone()),
                );
                tracing::info!(resource = %key, id = %id, "Created resource");
                Applied::created(attributes)
            }
        };

        if applied.has_changes()
            && let Some(store) = &self.store
        {
            store.save(state).await?;
        }

        Ok(applied)
    }

    async fn availability_zones(&self, region: &str) -> Result<Vec<String>> {
        if region != self.region {
            return Ok(Vec::new());
        }
        Ok(self.zones.clone())
    }

    async fn latest_image(&self, filter: &ImageFilter) -> Result<String> {
        self.images
            .iter()
            .filter(|image| image.matches(filter))
            .max_by(|a, b| a.created.cmp(&b.created))
            .map(|image| image.id.clone())
            .ok_or_else(|| CloudError::ImageNotFound(filter.to_string()))
    }
}

/// 64-bit FNV-1a, stable across runs and platforms
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn generate_secret(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())]))
        .collect()
}

/// Shell-style match as used by image filters (`*`, `?` and `[...]`)
fn glob_match(pattern: &str, value: &str) -> bool {
    glob::Pattern::new(pattern).is_ok_and(|pattern| pattern.matches(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vpc_request() -> CreateRequest {
        CreateRequest::new("vpc", kind::VPC).with_property("cidr_block", json!("10.0.0.0/16"))
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("Amazon Linux 2 *", "Amazon Linux 2 AMI x86_64"));
        assert!(glob_match("*x86_64*", "Amazon Linux 2 AMI x86_64 HVM"));
        assert!(glob_match("exact", "exact"));
        assert!(glob_match(
            "Amazon Linux 2 AMI 2.0.2024????.? x86_64*",
            "Amazon Linux 2 AMI 2.0.20240620.0 x86_64 HVM gp2"
        ));
        assert!(!glob_match("Amazon Linux 2 *", "Ubuntu 22.04"));
        assert!(!glob_match("a*b", "ab-c"));
        assert!(!glob_match("2.0.????", "2.0.123"));
        assert!(!glob_match("[unclosed", "[unclosed"));
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let engine = LocalEngine::in_memory("us-east-1");

        let first = engine.create(&vpc_request()).await.unwrap();
        let second = engine.create(&vpc_request()).await.unwrap();

        assert!(first.has_changes());
        assert!(!second.has_changes());
        assert_eq!(first.attributes["id"], second.attributes["id"]);
    }

    #[tokio::test]
    async fn test_changed_properties_update_in_place() {
        let engine = LocalEngine::in_memory("us-east-1");
        let first = engine.create(&vpc_request()).await.unwrap();

        let changed = vpc_request().with_property("enable_dns_hostnames", json!(true));
        let second = engine.create(&changed).await.unwrap();

        assert_eq!(second.action, crate::ActionType::Update);
        assert_eq!(first.attributes["id"], second.attributes["id"]);
    }

    #[tokio::test]
    async fn test_database_attributes() {
        let engine = LocalEngine::in_memory("us-east-1");
        let request =
            CreateRequest::new("db", kind::DB_INSTANCE).with_property("port", json!(3306));

        let applied = engine.create(&request).await.unwrap();
        let address = applied.attributes["address"].as_str().unwrap();

        assert!(address.starts_with("db."));
        assert_eq!(applied.attributes["port"], json!(3306));
        assert_eq!(
            applied.attributes["endpoint"],
            json!(format!("{address}:3306"))
        );
    }

    #[tokio::test]
    async fn test_generated_password_is_stable() {
        let engine = LocalEngine::in_memory("us-east-1");
        let request = CreateRequest::new("db-password", kind::RANDOM_PASSWORD)
            .with_property("length", json!(24));

        let first = engine.create(&request).await.unwrap();
        let second = engine.create(&request).await.unwrap();

        let secret = first.attributes["result"].as_str().unwrap();
        assert_eq!(secret.len(), 24);
        assert!(secret.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));
        assert_eq!(first.attributes["result"], second.attributes["result"]);
    }

    #[tokio::test]
    async fn test_generated_password_is_not_derived_from_its_id() {
        let request = CreateRequest::new("db-password", kind::RANDOM_PASSWORD)
            .with_property("length", json!(32));

        let first = LocalEngine::in_memory("us-east-1").create(&request).await.unwrap();
        let second = LocalEngine::in_memory("us-east-1").create(&request).await.unwrap();

        assert_eq!(first.attributes["id"], second.attributes["id"]);
        assert_ne!(first.attributes["result"], second.attributes["result"]);
    }

    #[tokio::test]
    async fn test_generated_password_survives_update() {
        let engine = LocalEngine::in_memory("us-east-1");
        let request = CreateRequest::new("db-password", kind::RANDOM_PASSWORD)
            .with_property("length", json!(20));
        let first = engine.create(&request).await.unwrap();

        let relabelled = request.clone().with_property("keepers", json!({"rotation": 1}));
        let updated = engine.create(&relabelled).await.unwrap();
        assert_eq!(updated.action, crate::ActionType::Update);
        assert_eq!(first.attributes["result"], updated.attributes["result"]);

        let longer = request.with_property("length", json!(28));
        let regenerated = engine.create(&longer).await.unwrap();
        assert_eq!(regenerated.attributes["result"].as_str().unwrap().len(), 28);
    }

    #[tokio::test]
    async fn test_generated_password_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let request = CreateRequest::new("db-password", kind::RANDOM_PASSWORD);

        let engine = LocalEngine::open(temp_dir.path(), "us-east-1").await.unwrap();
        let first = engine.create(&request).await.unwrap();

        let reopened = LocalEngine::open(temp_dir.path(), "us-east-1").await.unwrap();
        let second = reopened.create(&request).await.unwrap();
        assert!(!second.has_changes());
        assert_eq!(first.attributes["result"], second.attributes["result"]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let engine = LocalEngine::in_memory("us-east-1").with_failure("vpc");
        let result = engine.create(&vpc_request()).await;
        assert!(matches!(result, Err(CloudError::ApiError(_))));
    }

    #[tokio::test]
    async fn test_availability_zones() {
        let engine = LocalEngine::in_memory("eu-west-1");
        let zones = engine.availability_zones("eu-west-1").await.unwrap();
        assert_eq!(zones, vec!["eu-west-1a", "eu-west-1b", "eu-west-1c"]);

        let engine = engine.with_zones(["eu-west-1a"]);
        assert_eq!(engine.availability_zones("eu-west-1").await.unwrap().len(), 1);
        assert!(engine.availability_zones("ap-south-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_image_picks_newest_match() {
        let engine = LocalEngine::in_memory("us-east-1");
        let filter = ImageFilter::new(["amazon"]).with_filter("description", "Amazon Linux 2 *");

        let image = engine.latest_image(&filter).await.unwrap();
        assert_eq!(image, "ami-0a1b2c3d4e5f60002");

        let by_name = ImageFilter::new(["amazon"])
            .with_filter("name", "amzn2-ami-hvm-2.0.????????.?-x86_64-gp2");
        assert_eq!(
            engine.latest_image(&by_name).await.unwrap(),
            "ami-0a1b2c3d4e5f60002"
        );

        let missing = ImageFilter::new(["nobody"]);
        assert!(matches!(
            engine.latest_image(&missing).await,
            Err(CloudError::ImageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_registered_image_joins_catalog() {
        let engine = LocalEngine::in_memory("us-east-1").with_image(LocalImage::new(
            "ami-0f0f0f0f0f0f0f0f0",
            "amazon",
            "amzn2-ami-hvm-2.0.20241001.0-x86_64-gp2",
            "Amazon Linux 2 AMI 2.0.20241001.0 x86_64 HVM gp2",
            "2024-10-01",
        ));
        let filter = ImageFilter::new(["amazon"])
            .with_filter("description", "Amazon Linux 2 AMI 2.0.2024????.? x86_64*");

        assert_eq!(
            engine.latest_image(&filter).await.unwrap(),
            "ami-0f0f0f0f0f0f0f0f0"
        );
    }

    #[tokio::test]
    async fn test_state_persists_between_engines() {
        let temp_dir = tempdir().unwrap();

        let engine = LocalEngine::open(temp_dir.path(), "us-east-1").await.unwrap();
        let first = engine.create(&vpc_request()).await.unwrap();
        assert!(first.has_changes());

        let reopened = LocalEngine::open(temp_dir.path(), "us-east-1").await.unwrap();
        let second = reopened.create(&vpc_request()).await.unwrap();
        assert!(!second.has_changes());
        assert_eq!(reopened.snapshot().await.resources.len(), 1);
    }
}
