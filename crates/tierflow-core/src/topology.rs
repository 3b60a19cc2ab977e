//! Multi-tier topology synthesis
//!
//! Turns a [`StackConfig`] plus the environment answers (zones, image) into
//! a [`DependencyGraph`]: network, security groups, database, bastion,
//! load-balanced autoscaling group, optional serverless schedule and DNS
//! record. Cross-resource values are handles from the shared
//! [`ResultTable`], so most edges come from the properties themselves.

use crate::address::{self, Subnet, SubnetPlan, Tier};
use crate::compose::PayloadComposer;
use crate::declaration::{PropertyValue, ResourceDeclaration};
use crate::deferred::DeferredValue;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::model::{IngressRule, StackConfig};
use crate::table::ResultTable;
use serde_json::json;
use std::collections::BTreeMap;
use tierflow_cloud::kind;
use tracing::debug;

pub const VPC: &str = "vpc";
pub const GATEWAY: &str = "gateway";
pub const PUBLIC_SECURITY_GROUP: &str = "public-sg";
pub const PRIVATE_SECURITY_GROUP: &str = "private-sg";
pub const DB_SECURITY_GROUP: &str = "db-sg";
pub const DB_PASSWORD: &str = "db-password";
pub const DB_SUBNET_GROUP: &str = "db-subnet-group";
pub const DATABASE: &str = "database";
pub const BASTION: &str = "bastion";
pub const LAUNCH_TEMPLATE: &str = "app-template";
pub const TARGET_GROUP: &str = "app-targets";
pub const LOAD_BALANCER: &str = "app-lb";
pub const LISTENER: &str = "app-listener";
pub const AUTOSCALING_GROUP: &str = "app-asg";
pub const FUNCTION: &str = "maintenance-fn";
pub const SCHEDULE: &str = "maintenance-schedule";
pub const SCHEDULE_TARGET: &str = "maintenance-target";
pub const FUNCTION_PERMISSION: &str = "maintenance-permission";
pub const DNS_RECORD: &str = "dns-record";

const ANYWHERE: &str = "0.0.0.0/0";

/// Resource name of a planned subnet (`public-subnet-0`, `private-subnet-1`)
pub fn subnet_name(subnet: &Subnet) -> String {
    format!("{}-subnet-{}", subnet.tier, subnet.zone_index)
}

/// Resource name of a tier's route table
pub fn route_table_name(tier: Tier) -> String {
    format!("{}-routes", tier)
}

/// Declarations for one stack, ready to provision
#[derive(Debug)]
pub struct Topology {
    pub graph: DependencyGraph,
    pub subnets: SubnetPlan,
    pub zones: Vec<String>,
}

/// Synthesize the full resource graph
///
/// `zones` are the zones actually used (already reconciled with the zone
/// policy) and `image_id` the resolved compute image. Every deferred value
/// is taken from `table`, which the orchestrator must publish into.
pub fn build(
    config: &StackConfig,
    zones: &[String],
    image_id: &str,
    table: &ResultTable,
) -> Result<Topology> {
    let subnets = address::plan(&config.network.cidr, zones.len(), config.network.subnet_prefix)?;
    let builder = Builder {
        config,
        zones,
        image_id,
        table,
        subnets: &subnets,
    };

    let mut graph = DependencyGraph::new();
    for declaration in builder.declarations()? {
        graph.add_node(declaration)?;
    }
    graph.validate()?;

    debug!(nodes = graph.len(), zones = zones.len(), "Synthesized topology");
    Ok(Topology {
        graph,
        subnets,
        zones: zones.to_vec(),
    })
}

struct Builder<'a> {
    config: &'a StackConfig,
    zones: &'a [String],
    image_id: &'a str,
    table: &'a ResultTable,
    subnets: &'a SubnetPlan,
}

impl Builder<'_> {
    fn out(&self, resource: &str, attribute: &str) -> DeferredValue {
        self.table.output(resource, attribute)
    }

    fn tags(&self, name: &str) -> PropertyValue {
        BTreeMap::from([
            (
                "Name".to_string(),
                PropertyValue::from(format!("{}-{}", self.config.name, name)),
            ),
            ("Stack".to_string(), PropertyValue::from(self.config.name.as_str())),
        ])
        .into()
    }

    fn subnet_ids(&self, tier: Tier) -> Vec<DeferredValue> {
        self.subnets
            .by_tier(tier)
            .map(|subnet| self.out(&subnet_name(subnet), "id"))
            .collect()
    }

    fn declarations(&self) -> Result<Vec<ResourceDeclaration>> {
        let mut out = Vec::new();
        self.network(&mut out);
        self.security_groups(&mut out);
        let bootstrap = self.database(&mut out)?;
        self.compute(&mut out, &bootstrap);
        if self.config.serverless.is_some() {
            self.serverless(&mut out);
        }
        if let Some(domain) = &self.config.domain {
            out.push(
                ResourceDeclaration::new(DNS_RECORD, kind::DNS_RECORD)
                    .property("name", domain.as_str())
                    .property("type", "CNAME")
                    .property("ttl", 300u32)
                    .property("records", vec![self.out(LOAD_BALANCER, "dns_name")]),
            );
        }
        Ok(out)
    }

    fn network(&self, out: &mut Vec<ResourceDeclaration>) {
        let vpc_id = self.out(VPC, "id");

        out.push(
            ResourceDeclaration::new(VPC, kind::VPC)
                .property("cidr_block", self.config.network.cidr.to_string())
                .property("enable_dns_hostnames", true)
                .property("enable_dns_support", true)
                .property("tags", self.tags(VPC)),
        );
        out.push(
            ResourceDeclaration::new(GATEWAY, kind::INTERNET_GATEWAY)
                .property("vpc_id", &vpc_id)
                .property("tags", self.tags(GATEWAY)),
        );

        for subnet in self.subnets.iter() {
            let name = subnet_name(subnet);
            out.push(
                ResourceDeclaration::new(&name, kind::SUBNET)
                    .property("vpc_id", &vpc_id)
                    .property("cidr_block", subnet.block.to_string())
                    .property(
                        "availability_zone",
                        self.zones[subnet.zone_index].as_str(),
                    )
                    .property("map_public_ip_on_launch", subnet.tier == Tier::Public)
                    .property("tags", self.tags(&name)),
            );
        }

        for tier in Tier::ALL {
            let table_name = route_table_name(tier);
            let routes: Vec<PropertyValue> = match tier {
                Tier::Public => vec![
                    BTreeMap::from([
                        ("cidr_block".to_string(), PropertyValue::from(ANYWHERE)),
                        (
                            "gateway_id".to_string(),
                            PropertyValue::from(self.out(GATEWAY, "id")),
                        ),
                    ])
                    .into(),
                ],
                Tier::Private => Vec::new(),
            };
            out.push(
                ResourceDeclaration::new(&table_name, kind::ROUTE_TABLE)
                    .property("vpc_id", &vpc_id)
                    .property("routes", routes)
                    .property("tags", self.tags(&table_name)),
            );

            for subnet in self.subnets.by_tier(tier) {
                out.push(
                    ResourceDeclaration::new(
                        format!("{}-{}", table_name, subnet.zone_index),
                        kind::ROUTE_TABLE_ASSOCIATION,
                    )
                    .property("subnet_id", self.out(&subnet_name(subnet), "id"))
                    .property("route_table_id", self.out(&table_name, "id")),
                );
            }
        }
    }

    fn security_groups(&self, out: &mut Vec<ResourceDeclaration>) {
        let vpc_id = self.out(VPC, "id");
        let egress_rule = IngressRule::new("-1", 0, 0).from_source(ANYWHERE);
        let egress_all: PropertyValue = vec![rule_value(&egress_rule)].into();
        let configured = |tier: Tier| -> Vec<PropertyValue> {
            self.config
                .ingress
                .get(&tier)
                .into_iter()
                .flatten()
                .map(rule_value)
                .collect()
        };

        out.push(
            ResourceDeclaration::new(PUBLIC_SECURITY_GROUP, kind::SECURITY_GROUP)
                .property("vpc_id", &vpc_id)
                .property("description", "Internet facing load balancer and bastion")
                .property("ingress", configured(Tier::Public))
                .property("egress", egress_all.clone())
                .property("tags", self.tags(PUBLIC_SECURITY_GROUP)),
        );

        let app_port = self.config.compute.app_port;
        let mut private = configured(Tier::Private);
        private.push(group_rule(app_port, self.out(PUBLIC_SECURITY_GROUP, "id")));
        out.push(
            ResourceDeclaration::new(PRIVATE_SECURITY_GROUP, kind::SECURITY_GROUP)
                .property("vpc_id", &vpc_id)
                .property("description", "Application instances")
                .property("ingress", private)
                .property("egress", egress_all.clone())
                .property("tags", self.tags(PRIVATE_SECURITY_GROUP)),
        );

        let db_port = self.config.database.port;
        out.push(
            ResourceDeclaration::new(DB_SECURITY_GROUP, kind::SECURITY_GROUP)
                .property("vpc_id", &vpc_id)
                .property("description", "Database access from the application tier")
                .property(
                    "ingress",
                    vec![
                        group_rule(db_port, self.out(PRIVATE_SECURITY_GROUP, "id")),
                        group_rule(db_port, self.out(PUBLIC_SECURITY_GROUP, "id")),
                    ],
                )
                .property("egress", egress_all)
                .property("tags", self.tags(DB_SECURITY_GROUP)),
        );
    }

    /// Database resources; returns the composed bootstrap payload
    fn database(&self, out: &mut Vec<ResourceDeclaration>) -> Result<DeferredValue> {
        let db = &self.config.database;
        let mut composer = PayloadComposer::new()
            .with_static("db_name", db.name.as_str())
            .with_static("app_port", self.config.compute.app_port);
        let mut inputs = vec![
            ("db_host", self.out(DATABASE, "address")),
            ("db_port", self.out(DATABASE, "port")),
            ("db_username", self.out(DATABASE, "username")),
        ];

        let password: PropertyValue = match &db.password {
            Some(password) => {
                composer = composer.with_static("db_password", password.as_str());
                password.as_str().into()
            }
            None => {
                out.push(
                    ResourceDeclaration::new(DB_PASSWORD, kind::RANDOM_PASSWORD)
                        .property("length", 20u32)
                        .property("special", false),
                );
                let generated = self.out(DB_PASSWORD, "result");
                inputs.push(("db_password", generated.clone()));
                generated.into()
            }
        };

        out.push(
            ResourceDeclaration::new(DB_SUBNET_GROUP, kind::DB_SUBNET_GROUP)
                .property("subnet_ids", self.subnet_ids(Tier::Private))
                .property("tags", self.tags(DB_SUBNET_GROUP)),
        );
        out.push(
            ResourceDeclaration::new(DATABASE, kind::DB_INSTANCE)
                .property("engine", db.engine.as_str())
                .property("engine_version", db.version.as_str())
                .property("instance_class", db.instance_class.as_str())
                .property("allocated_storage", db.storage_gb)
                .property("db_name", db.name.as_str())
                .property("username", db.username.as_str())
                .property("password", password)
                .property("port", db.port)
                .property("db_subnet_group_name", self.out(DB_SUBNET_GROUP, "id"))
                .property(
                    "vpc_security_group_ids",
                    vec![self.out(DB_SECURITY_GROUP, "id")],
                )
                .property("publicly_accessible", false)
                .property("skip_final_snapshot", true)
                .property("tags", self.tags(DATABASE)),
        );

        composer.compose(&self.config.compute.bootstrap, inputs)
    }

    fn compute(&self, out: &mut Vec<ResourceDeclaration>, bootstrap: &DeferredValue) {
        let compute = &self.config.compute;
        let first_public = self
            .subnets
            .by_tier(Tier::Public)
            .next()
            .map(|subnet| self.out(&subnet_name(subnet), "id"));

        let mut bastion = ResourceDeclaration::new(BASTION, kind::INSTANCE)
            .property("ami", self.image_id)
            .property("instance_type", compute.instance_class.as_str())
            .property(
                "vpc_security_group_ids",
                vec![self.out(PUBLIC_SECURITY_GROUP, "id")],
            )
            .property("associate_public_ip_address", true)
            .property("user_data", bootstrap)
            .property("tags", self.tags(BASTION))
            .depends_on(DATABASE)
            .depends_on(format!("{}-0", route_table_name(Tier::Public)));
        if let Some(subnet_id) = first_public {
            bastion = bastion.property("subnet_id", subnet_id);
        }
        if let Some(key) = &compute.key_name {
            bastion = bastion.property("key_name", key.as_str());
        }
        out.push(bastion);

        let mut template = ResourceDeclaration::new(LAUNCH_TEMPLATE, kind::LAUNCH_TEMPLATE)
            .property("name_prefix", format!("{}-app-", self.config.name))
            .property("image_id", self.image_id)
            .property("instance_type", compute.instance_class.as_str())
            .property(
                "vpc_security_group_ids",
                vec![self.out(PRIVATE_SECURITY_GROUP, "id")],
            )
            .property("user_data", bootstrap);
        if let Some(key) = &compute.key_name {
            template = template.property("key_name", key.as_str());
        }
        out.push(template);

        out.push(
            ResourceDeclaration::new(TARGET_GROUP, kind::TARGET_GROUP)
                .property("port", compute.app_port)
                .property("protocol", "HTTP")
                .property("vpc_id", self.out(VPC, "id"))
                .property(
                    "health_check",
                    BTreeMap::from([
                        ("path".to_string(), PropertyValue::from("/")),
                        ("matcher".to_string(), PropertyValue::from("200-399")),
                    ]),
                ),
        );
        out.push(
            ResourceDeclaration::new(LOAD_BALANCER, kind::LOAD_BALANCER)
                .property("load_balancer_type", "application")
                .property("internal", false)
                .property("subnets", self.subnet_ids(Tier::Public))
                .property(
                    "security_groups",
                    vec![self.out(PUBLIC_SECURITY_GROUP, "id")],
                )
                .property("tags", self.tags(LOAD_BALANCER))
                .depends_on(GATEWAY),
        );
        out.push(
            ResourceDeclaration::new(LISTENER, kind::LISTENER)
                .property("load_balancer_arn", self.out(LOAD_BALANCER, "arn"))
                .property("port", 80u16)
                .property("protocol", "HTTP")
                .property(
                    "default_action",
                    BTreeMap::from([
                        ("type".to_string(), PropertyValue::from("forward")),
                        (
                            "target_group_arn".to_string(),
                            PropertyValue::from(self.out(TARGET_GROUP, "arn")),
                        ),
                    ]),
                ),
        );
        out.push(
            ResourceDeclaration::new(AUTOSCALING_GROUP, kind::AUTOSCALING_GROUP)
                .property("min_size", compute.min_size)
                .property("max_size", compute.max_size)
                .property("desired_capacity", compute.desired())
                .property("vpc_zone_identifier", self.subnet_ids(Tier::Private))
                .property("target_group_arns", vec![self.out(TARGET_GROUP, "arn")])
                .property(
                    "launch_template",
                    BTreeMap::from([
                        (
                            "id".to_string(),
                            PropertyValue::from(self.out(LAUNCH_TEMPLATE, "id")),
                        ),
                        ("version".to_string(), PropertyValue::from("$Latest")),
                    ]),
                )
                .property("health_check_type", "ELB")
                .depends_on(LISTENER)
                .depends_on(format!("{}-0", route_table_name(Tier::Private))),
        );
    }

    fn serverless(&self, out: &mut Vec<ResourceDeclaration>) {
        let Some(serverless) = &self.config.serverless else {
            return;
        };

        let environment = BTreeMap::from([
            (
                "DB_HOST".to_string(),
                PropertyValue::from(self.out(DATABASE, "address")),
            ),
            (
                "APP_URL".to_string(),
                PropertyValue::from(self.out(LOAD_BALANCER, "dns_name")),
            ),
        ]);
        let vpc_config = BTreeMap::from([
            (
                "subnet_ids".to_string(),
                PropertyValue::from(self.subnet_ids(Tier::Private)),
            ),
            (
                "security_group_ids".to_string(),
                PropertyValue::from(vec![self.out(PRIVATE_SECURITY_GROUP, "id")]),
            ),
        ]);

        out.push(
            ResourceDeclaration::new(FUNCTION, kind::FUNCTION)
                .property("runtime", serverless.runtime.as_str())
                .property("handler", serverless.handler.as_str())
                .property("memory_size", serverless.memory_mb)
                .property("timeout", serverless.timeout_secs)
                .property("environment", environment)
                .property("vpc_config", vpc_config)
                .property("tags", self.tags(FUNCTION)),
        );
        out.push(
            ResourceDeclaration::new(SCHEDULE, kind::EVENT_RULE)
                .property("schedule_expression", serverless.schedule.as_str())
                .property("tags", self.tags(SCHEDULE)),
        );
        out.push(
            ResourceDeclaration::new(FUNCTION_PERMISSION, kind::FUNCTION_PERMISSION)
                .property("action", "lambda:InvokeFunction")
                .property("function_name", self.out(FUNCTION, "id"))
                .property("principal", "events.amazonaws.com")
                .property("source_arn", self.out(SCHEDULE, "arn")),
        );
        out.push(
            ResourceDeclaration::new(SCHEDULE_TARGET, kind::EVENT_TARGET)
                .property("rule", self.out(SCHEDULE, "id"))
                .property("arn", self.out(FUNCTION, "arn"))
                .depends_on(FUNCTION_PERMISSION),
        );
    }
}

fn rule_value(rule: &IngressRule) -> PropertyValue {
    PropertyValue::Literal(json!({
        "protocol": rule.protocol,
        "from_port": rule.from_port,
        "to_port": rule.to_port,
        "cidr_blocks": rule.sources,
    }))
}

/// TCP on `port` from members of another security group
fn group_rule(port: u16, group_id: DeferredValue) -> PropertyValue {
    BTreeMap::from([
        ("protocol".to_string(), PropertyValue::from("tcp")),
        ("from_port".to_string(), PropertyValue::from(port)),
        ("to_port".to_string(), PropertyValue::from(port)),
        (
            "security_groups".to_string(),
            PropertyValue::from(vec![group_id]),
        ),
    ])
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;
    use crate::model::ServerlessConfig;
    use std::collections::BTreeSet;

    fn zones(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("us-east-1{}", (b'a' + i as u8) as char)).collect()
    }

    fn names(topology: &Topology) -> BTreeSet<String> {
        topology.graph.nodes().map(|d| d.name.clone()).collect()
    }

    #[test]
    fn test_default_topology() {
        let table = ResultTable::new();
        let topology = build(&StackConfig::default(), &zones(2), "ami-1", &table).unwrap();

        assert_eq!(topology.subnets.len(), 4);
        assert_eq!(topology.graph.len(), 24);

        let names = names(&topology);
        for expected in [
            VPC,
            GATEWAY,
            "public-subnet-0",
            "private-subnet-1",
            "public-routes",
            "private-routes-1",
            DB_PASSWORD,
            DATABASE,
            BASTION,
            LOAD_BALANCER,
            AUTOSCALING_GROUP,
        ] {
            assert!(names.contains(expected), "missing {}", expected);
        }
        assert!(!names.contains(FUNCTION));
        assert!(!names.contains(DNS_RECORD));
    }

    #[test]
    fn test_order_puts_database_before_instances() {
        let table = ResultTable::new();
        let topology = build(&StackConfig::default(), &zones(2), "ami-1", &table).unwrap();
        let order = topology.graph.topological_order().unwrap();
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();

        assert_eq!(order[0], VPC);
        assert!(position(DB_PASSWORD) < position(DATABASE));
        assert!(position(DATABASE) < position(BASTION));
        assert!(position(DATABASE) < position(LAUNCH_TEMPLATE));
        assert!(position(GATEWAY) < position(LOAD_BALANCER));
        assert!(position(LISTENER) < position(AUTOSCALING_GROUP));
    }

    #[test]
    fn test_subnets_follow_plan_and_zones() {
        let table = ResultTable::new();
        let topology = build(&StackConfig::default(), &zones(3), "ami-1", &table).unwrap();

        let subnet = topology.graph.get("private-subnet-2").unwrap();
        let request = subnet.display_properties();
        assert_eq!(request["cidr_block"], json!("10.0.5.0/24"));
        assert_eq!(request["availability_zone"], json!("us-east-1c"));
        assert_eq!(request["map_public_ip_on_launch"], json!(false));
        assert_eq!(request["vpc_id"], json!("${vpc.id}"));
    }

    #[test]
    fn test_configured_password_skips_generation() {
        let mut config = StackConfig::default();
        config.database.password = Some("correct-horse".to_string());
        let table = ResultTable::new();
        let topology = build(&config, &zones(2), "ami-1", &table).unwrap();

        assert!(!topology.graph.contains(DB_PASSWORD));
        let database = topology.graph.get(DATABASE).unwrap().display_properties();
        assert_eq!(database["password"], json!("correct-horse"));
    }

    #[test]
    fn test_optional_resources() {
        let mut config = StackConfig::default();
        config.domain = Some("shop.example.com".to_string());
        config.serverless = Some(ServerlessConfig::default());
        let table = ResultTable::new();
        let topology = build(&config, &zones(2), "ami-1", &table).unwrap();

        let names = names(&topology);
        for expected in [FUNCTION, SCHEDULE, SCHEDULE_TARGET, FUNCTION_PERMISSION, DNS_RECORD] {
            assert!(names.contains(expected), "missing {}", expected);
        }
        let dns = topology.graph.predecessors(DNS_RECORD).unwrap();
        assert!(dns.contains(LOAD_BALANCER));
        topology.graph.topological_order().unwrap();
    }

    #[test]
    fn test_exhausted_address_space() {
        let mut config = StackConfig::default();
        config.network.cidr = "10.0.0.0/23".parse().unwrap();
        let table = ResultTable::new();

        let result = build(&config, &zones(2), "ami-1", &table);
        assert!(matches!(result, Err(StackError::AddressSpaceExhausted { .. })));
    }

    #[test]
    fn test_bad_bootstrap_template_is_rejected() {
        let mut config = StackConfig::default();
        config.compute.bootstrap = "{{ unknown_setting }}".to_string();
        let table = ResultTable::new();

        let result = build(&config, &zones(2), "ami-1", &table);
        assert!(matches!(result, Err(StackError::Template(_))));
    }
}
