//! Provisioning report

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use tierflow_cloud::{ActionType, Attributes};

/// Property and attribute names whose values are masked in serialized reports
const SENSITIVE_KEYS: &[&str] = &["password", "result", "user_data"];

/// Replacement written for masked values
pub const REDACTED: &str = "<redacted>";

fn redacted<S: Serializer>(
    values: &BTreeMap<String, Value>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(values.len()))?;
    for (key, value) in values {
        if SENSITIVE_KEYS.contains(&key.as_str()) {
            map.serialize_entry(key, REDACTED)?;
        } else {
            map.serialize_entry(key, value)?;
        }
    }
    map.end()
}

/// Outcome of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// The engine created or updated the resource
    Created,
    /// The resource already matched its declaration
    Unchanged,
    /// The engine (or value substitution) failed for this node
    Failed,
    /// A predecessor failed, so the node was never submitted
    Skipped,
    /// The run was cancelled before the node was submitted
    Cancelled,
}

impl NodeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeStatus::Created | NodeStatus::Unchanged)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Created => write!(f, "created"),
            NodeStatus::Unchanged => write!(f, "unchanged"),
            NodeStatus::Failed => write!(f, "failed"),
            NodeStatus::Skipped => write!(f, "skipped"),
            NodeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a node failed, with enough context to diagnose without re-running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningFailure {
    pub node: String,
    pub cause: String,
    #[serde(serialize_with = "redacted")]
    pub properties: BTreeMap<String, Value>,
    pub predecessor_chain: Vec<String>,
}

impl std::fmt::Display for ProvisioningFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.node, self.cause)
    }
}

/// Result of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub name: String,
    pub kind: String,
    pub status: NodeStatus,

    /// What the engine did, when it was asked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionType>,

    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        serialize_with = "redacted"
    )]
    pub attributes: Attributes,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProvisioningFailure>,

    /// Failed predecessor for skipped nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub duration_ms: u64,
}

impl NodeReport {
    pub(crate) fn new(name: &str, kind: &str, status: NodeStatus) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            status,
            action: None,
            attributes: Attributes::new(),
            error: None,
            reason: None,
            duration_ms: 0,
        }
    }
}

/// Per-node outcome of a provisioning run, in provisioning order
///
/// The in-memory report carries every attribute as published. Serialized
/// reports mask secrets such as generated passwords and bootstrap scripts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub nodes: Vec<NodeReport>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,

    pub cancelled: bool,
}

impl ProvisionReport {
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.nodes.iter().all(|n| n.status.is_success())
    }

    pub fn get(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn status(&self, name: &str) -> Option<NodeStatus> {
        self.get(name).map(|n| n.status)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProvisioningFailure> {
        self.nodes.iter().filter_map(|n| n.error.as_ref())
    }

    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<&NodeReport> {
        self.nodes.iter().filter(|n| n.status == status).collect()
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            created: self.nodes_with_status(NodeStatus::Created).len(),
            unchanged: self.nodes_with_status(NodeStatus::Unchanged).len(),
            failed: self.nodes_with_status(NodeStatus::Failed).len(),
            skipped: self.nodes_with_status(NodeStatus::Skipped).len(),
            cancelled: self.nodes_with_status(NodeStatus::Cancelled).len(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Counts per status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub created: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl std::fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} unchanged, {} failed, {} skipped, {} cancelled",
            self.created, self.unchanged, self.failed, self.skipped, self.cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report() -> ProvisionReport {
        let mut created = NodeReport::new("a", "ec2:vpc", NodeStatus::Created);
        created.action = Some(ActionType::Create);
        created.attributes.insert("id".into(), json!("vpc-1"));

        let mut failed = NodeReport::new("b", "ec2:subnet", NodeStatus::Failed);
        failed.error = Some(ProvisioningFailure {
            node: "b".into(),
            cause: "quota exceeded".into(),
            properties: BTreeMap::from([("cidr_block".into(), json!("10.0.0.0/24"))]),
            predecessor_chain: vec!["a".into()],
        });

        let mut skipped = NodeReport::new("c", "ec2:instance", NodeStatus::Skipped);
        skipped.reason = Some("b".into());

        ProvisionReport {
            nodes: vec![created, failed, skipped],
            duration_ms: 12,
            cancelled: false,
        }
    }

    #[test]
    fn test_summary() {
        let report = report();
        assert!(!report.is_success());
        assert_eq!(
            report.summary().to_string(),
            "1 created, 0 unchanged, 1 failed, 1 skipped, 0 cancelled"
        );
        assert_eq!(report.status("c"), Some(NodeStatus::Skipped));
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_json_shape() {
        let json: Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();
        let nodes = json["nodes"].as_array().unwrap();

        assert_eq!(nodes[0]["status"], "created");
        assert_eq!(nodes[0]["action"], "create");
        assert_eq!(nodes[0]["attributes"]["id"], "vpc-1");
        assert!(nodes[0].get("error").is_none());

        assert_eq!(nodes[1]["status"], "failed");
        assert_eq!(nodes[1]["error"]["cause"], "quota exceeded");
        assert_eq!(nodes[1]["error"]["predecessor_chain"], json!(["a"]));

        assert_eq!(nodes[2]["status"], "skipped");
        assert_eq!(nodes[2]["reason"], "b");
    }

    #[test]
    fn test_json_masks_secrets() {
        let mut password = NodeReport::new("db-password", "random:password", NodeStatus::Created);
        password.attributes.insert("id".into(), json!("pw-1"));
        password.attributes.insert("result".into(), json!("s3cr3t-value"));

        let mut bastion = NodeReport::new("bastion", "ec2:instance", NodeStatus::Created);
        bastion
            .attributes
            .insert("user_data".into(), json!("DB_PASSWORD=s3cr3t-value\n"));

        let mut database = NodeReport::new("database", "rds:instance", NodeStatus::Failed);
        database.error = Some(ProvisioningFailure {
            node: "database".into(),
            cause: "rejected".into(),
            properties: BTreeMap::from([
                ("password".into(), json!("s3cr3t-value")),
                ("port".into(), json!(5432)),
            ]),
            predecessor_chain: vec![],
        });

        let report = ProvisionReport {
            nodes: vec![password, bastion, database],
            duration_ms: 3,
            cancelled: false,
        };
        let text = report.to_json().unwrap();
        assert!(!text.contains("s3cr3t-value"));

        let json: Value = serde_json::from_str(&text).unwrap();
        let nodes = json["nodes"].as_array().unwrap();
        assert_eq!(nodes[0]["attributes"]["id"], "pw-1");
        assert_eq!(nodes[0]["attributes"]["result"], REDACTED);
        assert_eq!(nodes[1]["attributes"]["user_data"], REDACTED);
        assert_eq!(nodes[2]["error"]["properties"]["password"], REDACTED);
        assert_eq!(nodes[2]["error"]["properties"]["port"], 5432);

        // The in-memory report is untouched
        assert_eq!(
            report.get("db-password").unwrap().attributes["result"],
            json!("s3cr3t-value")
        );
    }
}
