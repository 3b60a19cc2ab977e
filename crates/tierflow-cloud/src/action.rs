//! Action types reported by a provisioning engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attributes published by a provisioned resource (id, address, dns name, ...)
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// What the engine actually did for a create request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// A new resource was created
    Create,
    /// An existing resource was updated in place
    Update,
    /// The resource already matched the request
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Result of a single create request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Applied {
    /// Action the engine performed
    pub action: ActionType,

    /// Attributes known once the resource exists
    pub attributes: Attributes,
}

impl Applied {
    pub fn created(attributes: Attributes) -> Self {
        Self {
            action: ActionType::Create,
            attributes,
        }
    }

    pub fn updated(attributes: Attributes) -> Self {
        Self {
            action: ActionType::Update,
            attributes,
        }
    }

    pub fn unchanged(attributes: Attributes) -> Self {
        Self {
            action: ActionType::NoOp,
            attributes,
        }
    }

    /// Whether the engine had to change anything
    pub fn has_changes(&self) -> bool {
        self.action != ActionType::NoOp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_display() {
        assert_eq!(ActionType::Create.to_string(), "create");
        assert_eq!(ActionType::NoOp.to_string(), "no-op");
    }

    #[test]
    fn test_applied_has_changes() {
        assert!(Applied::created(Attributes::new()).has_changes());
        assert!(Applied::updated(Attributes::new()).has_changes());
        assert!(!Applied::unchanged(Attributes::new()).has_changes());
    }

    #[test]
    fn test_action_type_serde() {
        let json = serde_json::to_string(&ActionType::NoOp).unwrap();
        assert_eq!(json, "\"no_op\"");
    }
}
