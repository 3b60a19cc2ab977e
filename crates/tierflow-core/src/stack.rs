//! Stack entry point
//!
//! [`Stack`] ties the pieces together: it asks the engine about the
//! environment, plans addresses, synthesizes the topology and hands the
//! graph to the [`Orchestrator`]. What comes back is the provisioning report
//! plus the handful of outputs an operator actually needs.

use crate::address::{self, SubnetPlan, Tier};
use crate::error::Result;
use crate::model::StackConfig;
use crate::orchestrator::{CancelHandle, Orchestrator};
use crate::report::ProvisionReport;
use crate::table::ResultTable;
use crate::topology::{self, Topology};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tierflow_cloud::ProvisioningEngine;
use tracing::{info, instrument};

/// One subnet of the provisioned network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSummary {
    pub name: String,
    pub tier: Tier,
    pub zone: String,
    pub cidr: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub vpc_id: Option<String>,
    pub cidr: String,
    pub zones: Vec<String>,
    pub subnets: Vec<SubnetSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeEndpoints {
    /// `http://<bastion public ip>`
    pub instance_url: Option<String>,
    pub bastion_public_ip: Option<String>,
    pub autoscaling_group: Option<String>,
}

/// What a provisioning run exposes to its caller
///
/// Fields stay `None` when the producing resource did not provision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackOutputs {
    pub network_summary: NetworkSummary,
    pub compute_endpoints: ComputeEndpoints,
    pub database_endpoint: Option<String>,
    #[serde(rename = "loadBalancerDNS")]
    pub load_balancer_dns: Option<String>,
    pub domain: Option<String>,
}

impl StackOutputs {
    fn collect(config: &StackConfig, topology: &Topology, table: &ResultTable) -> Self {
        let text = |resource: &str, attribute: &str| -> Option<String> {
            table.output(resource, attribute).get().map(|value| match value {
                Value::String(s) => s,
                other => other.to_string(),
            })
        };

        let subnets = topology
            .subnets
            .iter()
            .map(|subnet| {
                let name = topology::subnet_name(subnet);
                SubnetSummary {
                    id: text(&name, "id"),
                    name,
                    tier: subnet.tier,
                    zone: topology.zones[subnet.zone_index].clone(),
                    cidr: subnet.block.to_string(),
                }
            })
            .collect();

        let bastion_ip = text(topology::BASTION, "public_ip");
        let database_endpoint = text(topology::DATABASE, "address")
            .zip(text(topology::DATABASE, "port"))
            .map(|(host, port)| format!("{}:{}", host, port));
        let domain = config
            .domain
            .as_ref()
            .and_then(|_| text(topology::DNS_RECORD, "fqdn"));

        Self {
            network_summary: NetworkSummary {
                vpc_id: text(topology::VPC, "id"),
                cidr: config.network.cidr.to_string(),
                zones: topology.zones.clone(),
                subnets,
            },
            compute_endpoints: ComputeEndpoints {
                instance_url: bastion_ip.as_ref().map(|ip| format!("http://{}", ip)),
                bastion_public_ip: bastion_ip,
                autoscaling_group: text(topology::AUTOSCALING_GROUP, "name"),
            },
            database_endpoint,
            load_balancer_dns: text(topology::LOAD_BALANCER, "dns_name"),
            domain,
        }
    }
}

/// Result of [`Stack::plan`]: everything decided before the first create
#[derive(Debug)]
pub struct StackPlan {
    pub zones: Vec<String>,
    pub image_id: String,
    pub topology: Topology,
    pub order: Vec<String>,
}

/// Result of a provisioning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackRun {
    pub outputs: StackOutputs,
    pub report: ProvisionReport,
    pub subnets: SubnetPlan,
}

/// A validated stack bound to an engine
pub struct Stack {
    config: StackConfig,
    engine: Arc<dyn ProvisioningEngine>,
}

impl Stack {
    /// Fails with a configuration error before anything touches the engine
    pub fn new(config: StackConfig, engine: Arc<dyn ProvisioningEngine>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, engine })
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    async fn plan_with(&self, table: &ResultTable) -> Result<StackPlan> {
        let network = &self.config.network;
        let available = self.engine.availability_zones(&self.config.region).await?;
        let zones = address::select_zones(network.zones, &available, network.zone_policy)?;

        let image_id = self.engine.latest_image(&self.config.compute.image).await?;
        info!(
            region = %self.config.region,
            zones = zones.len(),
            image = %image_id,
            "Resolved environment"
        );

        let topology = topology::build(&self.config, &zones, &image_id, table)?;
        let order = topology.graph.topological_order()?;
        Ok(StackPlan {
            zones,
            image_id,
            topology,
            order,
        })
    }

    /// Query the environment and synthesize the graph without creating anything
    pub async fn plan(&self) -> Result<StackPlan> {
        self.plan_with(&ResultTable::new()).await
    }

    pub async fn provision(&self) -> Result<StackRun> {
        self.provision_with_cancel(CancelHandle::new()).await
    }

    /// Provision the whole stack; `cancel` stops submission of new nodes
    #[instrument(skip(self, cancel), fields(stack = %self.config.name))]
    pub async fn provision_with_cancel(&self, cancel: CancelHandle) -> Result<StackRun> {
        let table = ResultTable::new();
        let plan = self.plan_with(&table).await?;

        let orchestrator = Orchestrator::new(self.engine.clone())
            .with_config(self.config.orchestrator.clone())
            .with_table(table.clone())
            .with_cancel(cancel);
        let report = orchestrator.provision(&plan.topology.graph).await?;

        let outputs = StackOutputs::collect(&self.config, &plan.topology, &table);
        Ok(StackRun {
            outputs,
            report,
            subnets: plan.topology.subnets,
        })
    }
}

/// Validate `config` and provision it through `engine`
pub async fn provision(
    config: StackConfig,
    engine: Arc<dyn ProvisioningEngine>,
) -> Result<StackRun> {
    Stack::new(config, engine)?.provision().await
}
