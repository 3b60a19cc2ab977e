//! Resource declarations
//!
//! A declaration is one infrastructure object before it exists: a logical
//! name, a kind understood by the engine, a property bag whose values may
//! still be pending, and an explicit predecessor set.

use crate::deferred::{DeferredValue, UnresolvedValue};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tierflow_cloud::CreateRequest;

/// A property value, possibly referencing attributes of other resources
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Literal(Value),
    Deferred(DeferredValue),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Every deferred value reachable from this property
    pub fn collect_deferred(&self, out: &mut Vec<DeferredValue>) {
        match self {
            PropertyValue::Literal(_) => {}
            PropertyValue::Deferred(value) => out.push(value.clone()),
            PropertyValue::List(items) => items.iter().for_each(|item| item.collect_deferred(out)),
            PropertyValue::Map(entries) => entries
                .values()
                .for_each(|item| item.collect_deferred(out)),
        }
    }

    /// Substitute resolved values; fails on the first value still pending
    pub fn resolve(&self) -> Result<Value, UnresolvedValue> {
        match self {
            PropertyValue::Literal(value) => Ok(value.clone()),
            PropertyValue::Deferred(value) => value.try_get(),
            PropertyValue::List(items) => items
                .iter()
                .map(PropertyValue::resolve)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            PropertyValue::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.resolve().map(|v| (k.clone(), v)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
        }
    }

    /// Resolved values where known, `${resource.attribute}` otherwise
    pub fn display_value(&self) -> Value {
        match self {
            PropertyValue::Literal(value) => value.clone(),
            PropertyValue::Deferred(value) => value
                .get()
                .unwrap_or_else(|| Value::String(format!("${{{}}}", value.label()))),
            PropertyValue::List(items) => {
                Value::Array(items.iter().map(PropertyValue::display_value).collect())
            }
            PropertyValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.display_value()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        PropertyValue::Literal(value)
    }
}

impl From<DeferredValue> for PropertyValue {
    fn from(value: DeferredValue) -> Self {
        PropertyValue::Deferred(value)
    }
}

impl From<&DeferredValue> for PropertyValue {
    fn from(value: &DeferredValue) -> Self {
        PropertyValue::Deferred(value.clone())
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Literal(Value::String(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Literal(Value::Bool(value))
    }
}

impl From<u16> for PropertyValue {
    fn from(value: u16) -> Self {
        PropertyValue::Literal(Value::from(value))
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Literal(Value::from(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Literal(Value::from(value))
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(items: Vec<T>) -> Self {
        PropertyValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<PropertyValue>> From<BTreeMap<String, T>> for PropertyValue {
    fn from(entries: BTreeMap<String, T>) -> Self {
        PropertyValue::Map(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// One resource to provision
#[derive(Debug, Clone)]
pub struct ResourceDeclaration {
    pub name: String,
    pub kind: String,
    pub properties: BTreeMap<String, PropertyValue>,
    pub depends_on: BTreeSet<String>,
}

impl ResourceDeclaration {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            properties: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Explicit ordering edge that no property expresses
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.insert(name.into());
        self
    }

    pub fn deferred_inputs(&self) -> Vec<DeferredValue> {
        let mut out = Vec::new();
        for value in self.properties.values() {
            value.collect_deferred(&mut out);
        }
        out
    }

    /// Explicit predecessors plus the producers of every deferred property
    pub fn predecessors(&self) -> BTreeSet<String> {
        let mut names = self.depends_on.clone();
        for value in self.deferred_inputs() {
            names.extend(value.producers());
        }
        names
    }

    /// Build the engine request, substituting every deferred property
    pub fn to_request(&self) -> Result<CreateRequest, UnresolvedValue> {
        let mut request = CreateRequest::new(&self.name, &self.kind);
        for (key, value) in &self.properties {
            request.properties.insert(key.clone(), value.resolve()?);
        }
        Ok(request)
    }

    /// Property bag for diagnostics, with pending values shown by label
    pub fn display_properties(&self) -> BTreeMap<String, Value> {
        self.properties
            .iter()
            .map(|(k, v)| (k.clone(), v.display_value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predecessors_include_producers() {
        let vpc_id = DeferredValue::output("vpc", "id");
        let decl = ResourceDeclaration::new("subnet", "ec2:subnet")
            .property("vpc_id", &vpc_id)
            .property("cidr_block", "10.0.0.0/24")
            .depends_on("gateway");

        assert_eq!(
            decl.predecessors(),
            BTreeSet::from(["gateway".to_string(), "vpc".to_string()])
        );
    }

    #[test]
    fn test_nested_deferred_values_are_found() {
        let a = DeferredValue::output("subnet-a", "id");
        let b = DeferredValue::output("subnet-b", "id");
        let decl = ResourceDeclaration::new("asg", "autoscaling:group")
            .property("subnet_ids", vec![a, b])
            .property(
                "tags",
                BTreeMap::from([("Name".to_string(), PropertyValue::from("app"))]),
            );

        assert_eq!(decl.deferred_inputs().len(), 2);
        assert_eq!(decl.predecessors().len(), 2);
    }

    #[test]
    fn test_to_request_substitutes_values() {
        let host = DeferredValue::output("db", "address");
        let decl = ResourceDeclaration::new("app", "ec2:instance")
            .property("db_hosts", vec![host.clone()])
            .property("port", 8080u16);

        let err = decl.to_request().unwrap_err();
        assert_eq!(err, UnresolvedValue("db.address".to_string()));

        host.resolve(json!("db.internal")).unwrap();
        let request = decl.to_request().unwrap();
        assert_eq!(request.properties["db_hosts"], json!(["db.internal"]));
        assert_eq!(request.properties["port"], json!(8080));
    }

    #[test]
    fn test_display_properties_show_pending_labels() {
        let decl = ResourceDeclaration::new("dns", "route53:record")
            .property("target", DeferredValue::output("lb", "dns_name"));
        assert_eq!(decl.display_properties()["target"], json!("${lb.dns_name}"));
    }

    #[test]
    fn test_self_reference_is_kept_as_edge() {
        let decl = ResourceDeclaration::new("loop", "ec2:vpc")
            .property("id", DeferredValue::output("loop", "id"));
        assert_eq!(decl.predecessors(), BTreeSet::from(["loop".to_string()]));
    }
}
