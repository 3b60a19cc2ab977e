//! Result table: resource name → published attributes

use crate::deferred::DeferredValue;
use crate::error::{Result, StackError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tierflow_cloud::Attributes;

type Outputs = BTreeMap<String, BTreeMap<String, DeferredValue>>;

/// Shared table of deferred attributes
///
/// Declarations obtain handles with [`ResultTable::output`] before anything
/// exists; the orchestrator publishes each resource's attributes once it has
/// been applied. The mutex only guards handle creation; values themselves are
/// write-once and never read half-written.
#[derive(Clone, Default)]
pub struct ResultTable {
    outputs: Arc<Mutex<Outputs>>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Outputs> {
        self.outputs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle to `resource.attribute`, created pending on first request
    pub fn output(&self, resource: &str, attribute: &str) -> DeferredValue {
        self.lock()
            .entry(resource.to_string())
            .or_default()
            .entry(attribute.to_string())
            .or_insert_with(|| DeferredValue::output(resource, attribute))
            .clone()
    }

    /// Publish the attributes of an applied resource
    ///
    /// Publishing a resource again is accepted when every attribute it
    /// already resolved carries the same value; a re-run against an
    /// unchanged resource lands here. Any differing value is a
    /// [`StackError::DoubleResolution`] and nothing is resolved.
    ///
    /// Continuations of the resolved values run after the table lock is
    /// released, so they may request further handles.
    pub fn publish(&self, resource: &str, attributes: &Attributes) -> Result<()> {
        let pending: Vec<(DeferredValue, serde_json::Value)> = {
            let mut outputs = self.lock();
            let outputs = outputs.entry(resource.to_string()).or_default();
            let mut pending = Vec::new();
            for (attribute, value) in attributes {
                let handle = outputs
                    .entry(attribute.clone())
                    .or_insert_with(|| DeferredValue::output(resource, attribute.as_str()));
                match handle.get() {
                    None => pending.push((handle.clone(), value.clone())),
                    Some(current) if current == *value => {}
                    Some(_) => return Err(StackError::DoubleResolution(handle.label())),
                }
            }
            pending
        };

        let resolved = pending.len();
        for (handle, value) in pending {
            handle.resolve(value)?;
        }

        tracing::debug!(resource, resolved, "Published attributes");
        Ok(())
    }

    /// Resolved attributes of a resource
    pub fn attributes(&self, resource: &str) -> Attributes {
        self.lock()
            .get(resource)
            .map(|outputs| {
                outputs
                    .iter()
                    .filter_map(|(attribute, handle)| handle.get().map(|v| (attribute.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attributes(pairs: &[(&str, serde_json::Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_output_handles_are_shared() {
        let table = ResultTable::new();
        let a = table.output("db", "address");
        let b = table.output("db", "address");
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&table.output("db", "port")));
    }

    #[test]
    fn test_publish_resolves_requested_handles() {
        let table = ResultTable::new();
        let address = table.output("db", "address");

        table
            .publish(
                "db",
                &attributes(&[("address", json!("db.internal")), ("port", json!(5432))]),
            )
            .unwrap();

        assert_eq!(address.get(), Some(json!("db.internal")));
        assert_eq!(table.output("db", "port").get(), Some(json!(5432)));
        assert_eq!(table.attributes("db").len(), 2);
    }

    #[test]
    fn test_publish_with_different_value_is_double_resolution() {
        let table = ResultTable::new();
        table.publish("vpc", &attributes(&[("id", json!("vpc-1"))])).unwrap();

        let again = table.publish(
            "vpc",
            &attributes(&[("arn", json!("arn:vpc-2")), ("id", json!("vpc-2"))]),
        );
        match again {
            Err(StackError::DoubleResolution(label)) => assert_eq!(label, "vpc.id"),
            other => panic!("expected DoubleResolution, got {:?}", other.err()),
        }
        assert_eq!(table.output("vpc", "id").get(), Some(json!("vpc-1")));
        assert!(!table.output("vpc", "arn").is_resolved());
    }

    #[test]
    fn test_republish_with_equal_values_is_accepted() {
        let table = ResultTable::new();
        let published = attributes(&[("id", json!("vpc-1")), ("cidr", json!("10.0.0.0/16"))]);
        table.publish("vpc", &published).unwrap();

        table.publish("vpc", &published).unwrap();

        let mut extended = published.clone();
        extended.insert("arn".to_string(), json!("arn:vpc-1"));
        table.publish("vpc", &extended).unwrap();
        assert_eq!(table.attributes("vpc"), extended);
    }

    #[test]
    fn test_continuation_may_use_table() {
        let table = ResultTable::new();
        let id = table.output("vpc", "id");

        let inner = table.clone();
        id.on_resolve(move |_| {
            // Would deadlock if publish held the lock while resolving
            let _ = inner.output("subnet", "id");
        });

        table.publish("vpc", &attributes(&[("id", json!("vpc-1"))])).unwrap();
        assert!(!table.output("subnet", "id").is_resolved());
    }
}
