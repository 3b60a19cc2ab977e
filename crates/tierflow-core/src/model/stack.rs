//! Stack description

use super::compute::{ComputeConfig, DatabaseConfig, ServerlessConfig};
use super::network::{IngressRules, NetworkConfig, default_ingress};
use crate::address::AddressBlock;
use crate::error::{Result, StackError};
use crate::orchestrator::OrchestratorConfig;
use serde::{Deserialize, Serialize};

const PROTOCOLS: &[&str] = &["tcp", "udp", "icmp", "-1"];

/// Everything needed to synthesize and provision one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Prefix of every resource name tag
    pub name: String,
    pub region: String,
    pub network: NetworkConfig,
    pub ingress: IngressRules,
    pub compute: ComputeConfig,
    pub database: DatabaseConfig,

    /// Bound to the load balancer when set
    pub domain: Option<String>,

    pub serverless: Option<ServerlessConfig>,
    pub orchestrator: OrchestratorConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: "tierflow".to_string(),
            region: "us-east-1".to_string(),
            network: NetworkConfig::default(),
            ingress: default_ingress(),
            compute: ComputeConfig::default(),
            database: DatabaseConfig::default(),
            domain: None,
            serverless: None,
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

fn invalid(message: impl Into<String>) -> StackError {
    StackError::Configuration(message.into())
}

impl StackConfig {
    /// Reject settings that would fail only halfway through provisioning
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("stack name must not be empty"));
        }
        if self.region.trim().is_empty() {
            return Err(invalid("region must not be empty"));
        }

        self.validate_network()?;
        self.validate_compute()?;
        self.validate_database()?;

        if let Some(domain) = &self.domain
            && (!domain.contains('.') || domain.starts_with('.') || domain.ends_with('.'))
        {
            return Err(invalid(format!("'{}' is not a domain name", domain)));
        }

        if let Some(serverless) = &self.serverless {
            for (field, value) in [
                ("runtime", &serverless.runtime),
                ("handler", &serverless.handler),
                ("schedule", &serverless.schedule),
            ] {
                if value.trim().is_empty() {
                    return Err(invalid(format!("serverless {} must not be empty", field)));
                }
            }
        }

        if self.orchestrator.concurrency == 0 {
            return Err(invalid("orchestrator concurrency must be at least 1"));
        }
        Ok(())
    }

    fn validate_network(&self) -> Result<()> {
        let network = &self.network;
        if network.zones == 0 {
            return Err(invalid("network zones must be at least 1"));
        }
        if network.subnet_prefix <= network.cidr.prefix() {
            return Err(invalid(format!(
                "subnet mask /{} must be longer than the VPC block {}",
                network.subnet_prefix, network.cidr
            )));
        }
        let max_prefix = if network.cidr.is_ipv4() { 28 } else { 64 };
        if network.subnet_prefix > max_prefix {
            return Err(invalid(format!(
                "subnet mask /{} is smaller than the provider minimum /{}",
                network.subnet_prefix, max_prefix
            )));
        }

        for (tier, rules) in &self.ingress {
            for rule in rules {
                if !PROTOCOLS.contains(&rule.protocol.as_str()) {
                    return Err(invalid(format!(
                        "{} ingress: unknown protocol '{}'",
                        tier, rule.protocol
                    )));
                }
                if rule.from_port > rule.to_port {
                    return Err(invalid(format!(
                        "{} ingress: port range {}-{} is reversed",
                        tier, rule.from_port, rule.to_port
                    )));
                }
                if rule.sources.is_empty() {
                    return Err(invalid(format!(
                        "{} ingress: rule {}/{} has no source",
                        tier, rule.protocol, rule.from_port
                    )));
                }
                for source in &rule.sources {
                    source.parse::<AddressBlock>().map_err(|e| {
                        invalid(format!("{} ingress source '{}': {}", tier, source, e))
                    })?;
                }
            }
        }
        Ok(())
    }

    fn validate_compute(&self) -> Result<()> {
        let compute = &self.compute;
        if compute.instance_class.trim().is_empty() {
            return Err(invalid("compute instance-class must not be empty"));
        }
        if compute.max_size == 0 || compute.min_size > compute.max_size {
            return Err(invalid(format!(
                "compute size range {}..{} is invalid",
                compute.min_size, compute.max_size
            )));
        }
        let desired = compute.desired();
        if desired < compute.min_size || desired > compute.max_size {
            return Err(invalid(format!(
                "desired capacity {} is outside {}..{}",
                desired, compute.min_size, compute.max_size
            )));
        }
        if compute.app_port == 0 {
            return Err(invalid("compute app-port must not be 0"));
        }
        if compute.image.owners.is_empty() && compute.image.filters.is_empty() {
            return Err(invalid("compute image needs an owner or a filter"));
        }
        Ok(())
    }

    fn validate_database(&self) -> Result<()> {
        let database = &self.database;
        for (field, value) in [
            ("engine", &database.engine),
            ("version", &database.version),
            ("instance-class", &database.instance_class),
            ("name", &database.name),
            ("username", &database.username),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("database {} must not be empty", field)));
            }
        }
        if database.port == 0 {
            return Err(invalid("database port must not be 0"));
        }
        if let Some(password) = &database.password
            && password.len() < 8
        {
            return Err(invalid("database password must be at least 8 characters"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Tier;
    use crate::model::IngressRule;

    #[test]
    fn test_default_config_is_valid() {
        let config = StackConfig::default();
        config.validate().unwrap();
        assert_eq!(config.network.cidr.to_string(), "10.0.0.0/16");
        assert_eq!(config.ingress[&Tier::Public].len(), 4);
        assert_eq!(config.compute.instance_class, "t2.micro");
    }

    #[test]
    fn test_subnet_mask_must_fit_inside_vpc() {
        let mut config = StackConfig::default();
        config.network.subnet_prefix = 16;
        assert!(matches!(config.validate(), Err(StackError::Configuration(_))));

        config.network.subnet_prefix = 30;
        assert!(matches!(config.validate(), Err(StackError::Configuration(_))));
    }

    #[test]
    fn test_zero_zones_rejected() {
        let mut config = StackConfig::default();
        config.network.zones = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ingress_rules_validated() {
        let mut config = StackConfig::default();
        config.ingress.insert(
            Tier::Private,
            vec![IngressRule::new("tcp", 90, 80).from_source("10.0.0.0/16")],
        );
        assert!(config.validate().is_err());

        config
            .ingress
            .insert(Tier::Private, vec![IngressRule::tcp(5432).from_source("10.0.0.1/16")]);
        assert!(config.validate().is_err());

        config
            .ingress
            .insert(Tier::Private, vec![IngressRule::new("gre", 0, 0).from_source("10.0.0.0/16")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_compute_sizes_validated() {
        let mut config = StackConfig::default();
        config.compute.min_size = 3;
        config.compute.max_size = 2;
        assert!(config.validate().is_err());

        config.compute.max_size = 4;
        config.compute.desired_capacity = Some(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_password_rejected() {
        let mut config = StackConfig::default();
        config.database.password = Some("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_domain_validated() {
        let mut config = StackConfig::default();
        config.domain = Some("localhost".to_string());
        assert!(config.validate().is_err());
        config.domain = Some("shop.example.com".to_string());
        config.validate().unwrap();
    }
}
