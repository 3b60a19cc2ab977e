//! Compute, database and serverless settings

use serde::{Deserialize, Serialize};
use tierflow_cloud::ImageFilter;

/// Bootstrap script installed on every instance
///
/// Rendered with the database endpoint and credentials once the database
/// exists. Placeholders: `db_host`, `db_port`, `db_name`, `db_username`,
/// `db_password`, `app_port`.
pub const DEFAULT_BOOTSTRAP: &str = r#"#!/bin/bash
amazon-linux-extras install nginx1
amazon-linux-extras enable nginx
cat > /etc/app.env <<'ENV'
DB_HOST={{ db_host }}
DB_PORT={{ db_port }}
DB_NAME={{ db_name }}
DB_USERNAME={{ db_username }}
DB_PASSWORD={{ db_password }}
APP_PORT={{ app_port }}
ENV
systemctl enable nginx
systemctl start nginx
"#;

/// Instances behind the load balancer, plus the bastion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub instance_class: String,

    /// Newest image matching this filter is used
    pub image: ImageFilter,

    pub min_size: u32,
    pub max_size: u32,

    /// Defaults to `min_size`
    pub desired_capacity: Option<u32>,

    /// Port the application listens on
    pub app_port: u16,

    /// Tera template for instance user data
    pub bootstrap: String,

    pub key_name: Option<String>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            instance_class: "t2.micro".to_string(),
            image: default_image(),
            min_size: 1,
            max_size: 2,
            desired_capacity: None,
            app_port: 8080,
            bootstrap: DEFAULT_BOOTSTRAP.to_string(),
            key_name: None,
        }
    }
}

impl ComputeConfig {
    pub fn desired(&self) -> u32 {
        self.desired_capacity.unwrap_or(self.min_size)
    }
}

/// Latest Amazon Linux 2
pub fn default_image() -> ImageFilter {
    ImageFilter::new(["amazon"]).with_filter("description", "Amazon Linux 2 *")
}

/// Managed database instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub engine: String,
    pub version: String,
    pub instance_class: String,

    /// Initial database name
    pub name: String,
    pub username: String,

    /// Generated by the engine when absent
    #[serde(skip_serializing)]
    pub password: Option<String>,

    pub port: u16,
    pub storage_gb: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "postgres".to_string(),
            version: "15".to_string(),
            instance_class: "db.t3.micro".to_string(),
            name: "app".to_string(),
            username: "app".to_string(),
            password: None,
            port: 5432,
            storage_gb: 20,
        }
    }
}

/// Scheduled maintenance function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerlessConfig {
    pub runtime: String,
    pub handler: String,

    /// Schedule expression, e.g. `rate(5 minutes)`
    pub schedule: String,

    pub memory_mb: u32,
    pub timeout_secs: u32,
}

impl Default for ServerlessConfig {
    fn default() -> Self {
        Self {
            runtime: "provided.al2".to_string(),
            handler: "bootstrap".to_string(),
            schedule: "rate(1 hour)".to_string(),
            memory_mb: 128,
            timeout_secs: 30,
        }
    }
}
