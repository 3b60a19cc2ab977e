//! Write-once values published by provisioned resources
//!
//! A [`DeferredValue`] starts `Pending` and becomes `Resolved` exactly once.
//! Readers either see "not yet" or the final value. Continuations registered
//! with [`DeferredValue::on_resolve`] run once the value is known, which is
//! how composed payloads wait on several inputs without blocking anyone.

use crate::error::{Result, StackError};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

type Continuation = Box<dyn FnOnce(&Value) + Send>;

/// Attribute of a resource: `resource.attribute`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputKey {
    pub resource: String,
    pub attribute: String,
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

#[derive(Debug)]
enum Origin {
    Output(OutputKey),
    Composed {
        label: String,
        producers: BTreeSet<String>,
    },
}

struct Inner {
    origin: Origin,
    slot: OnceLock<Value>,
    continuations: Mutex<Vec<Continuation>>,
    resolved: watch::Sender<bool>,
}

/// Handle to a value that is known only after its producer is provisioned
///
/// Cloning the handle shares the same underlying slot.
#[derive(Clone)]
pub struct DeferredValue {
    inner: Arc<Inner>,
}

/// A property still referenced a pending value when it had to be sent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0} has not been resolved")]
pub struct UnresolvedValue(pub String);

impl DeferredValue {
    fn with_origin(origin: Origin) -> Self {
        let (resolved, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                origin,
                slot: OnceLock::new(),
                continuations: Mutex::new(Vec::new()),
                resolved,
            }),
        }
    }

    /// Pending attribute of a resource
    pub fn output(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::with_origin(Origin::Output(OutputKey {
            resource: resource.into(),
            attribute: attribute.into(),
        }))
    }

    /// Pending value derived from other deferred values
    pub(crate) fn composed(label: impl Into<String>, producers: BTreeSet<String>) -> Self {
        Self::with_origin(Origin::Composed {
            label: label.into(),
            producers,
        })
    }

    /// Human-readable name (`db.address`, `compose(db_host,db_port)`)
    pub fn label(&self) -> String {
        match &self.inner.origin {
            Origin::Output(key) => key.to_string(),
            Origin::Composed { label, .. } => label.clone(),
        }
    }

    /// The resource attribute this value stands for, if it is not composed
    pub fn key(&self) -> Option<&OutputKey> {
        match &self.inner.origin {
            Origin::Output(key) => Some(key),
            Origin::Composed { .. } => None,
        }
    }

    /// Resources that must be provisioned before this value can resolve
    pub fn producers(&self) -> BTreeSet<String> {
        match &self.inner.origin {
            Origin::Output(key) => BTreeSet::from([key.resource.clone()]),
            Origin::Composed { producers, .. } => producers.clone(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.slot.get().is_some()
    }

    /// The resolved value, or `None` while pending
    pub fn get(&self) -> Option<Value> {
        self.inner.slot.get().cloned()
    }

    /// Like [`get`](Self::get) but reports which value is missing
    pub fn try_get(&self) -> std::result::Result<Value, UnresolvedValue> {
        self.get().ok_or_else(|| UnresolvedValue(self.label()))
    }

    /// Publish the value; a second call fails with `DoubleResolution`
    pub fn resolve(&self, value: Value) -> Result<()> {
        self.inner
            .slot
            .set(value)
            .map_err(|_| StackError::DoubleResolution(self.label()))?;
        self.inner.resolved.send_replace(true);

        let pending = {
            let mut guard = self
                .inner
                .continuations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        if let Some(value) = self.inner.slot.get() {
            for continuation in pending {
                continuation(value);
            }
        }
        Ok(())
    }

    /// Run `f` once the value resolves (immediately if it already has)
    pub fn on_resolve<F>(&self, f: F)
    where
        F: FnOnce(&Value) + Send + 'static,
    {
        let mut guard = self
            .inner
            .continuations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match self.inner.slot.get() {
            Some(value) => {
                drop(guard);
                f(value);
            }
            None => guard.push(Box::new(f)),
        }
    }

    /// Suspend until the value resolves
    pub async fn wait(&self) -> Value {
        let mut rx = self.inner.resolved.subscribe();
        loop {
            if let Some(value) = self.get() {
                return value;
            }
            if rx.wait_for(|resolved| *resolved).await.is_err() {
                // The sender lives as long as `self`, so this cannot happen.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Whether both handles share the same slot
    pub fn ptr_eq(&self, other: &DeferredValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.slot.get() {
            Some(value) => write!(f, "DeferredValue({} = {})", self.label(), value),
            None => write!(f, "DeferredValue({}, pending)", self.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_pending_until_resolved() {
        let value = DeferredValue::output("db", "address");
        assert!(!value.is_resolved());
        assert_eq!(value.get(), None);
        assert_eq!(
            value.try_get(),
            Err(UnresolvedValue("db.address".to_string()))
        );

        value.resolve(json!("db.internal")).unwrap();
        assert!(value.is_resolved());
        assert_eq!(value.get(), Some(json!("db.internal")));
    }

    #[test]
    fn test_double_resolution_fails() {
        let value = DeferredValue::output("lb", "dns_name");
        value.resolve(json!("lb-1.elb")).unwrap();

        let second = value.resolve(json!("lb-2.elb"));
        assert!(
            matches!(second, Err(StackError::DoubleResolution(label)) if label == "lb.dns_name")
        );

        // Reads keep returning the first value
        for _ in 0..3 {
            assert_eq!(value.get(), Some(json!("lb-1.elb")));
        }
    }

    #[test]
    fn test_clones_share_the_slot() {
        let value = DeferredValue::output("vpc", "id");
        let clone = value.clone();
        assert!(value.ptr_eq(&clone));

        clone.resolve(json!("vpc-1")).unwrap();
        assert_eq!(value.get(), Some(json!("vpc-1")));
        assert!(!value.ptr_eq(&DeferredValue::output("vpc", "id")));
    }

    #[test]
    fn test_continuations_run_once() {
        let value = DeferredValue::output("db", "port");
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        value.on_resolve(move |v| {
            assert_eq!(v, &json!(5432));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        value.resolve(json!(5432)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Registered after resolution: runs immediately
        let counter = calls.clone();
        value.on_resolve(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let _ = value.resolve(json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_producers() {
        let output = DeferredValue::output("db", "address");
        assert_eq!(output.producers(), BTreeSet::from(["db".to_string()]));
        assert_eq!(output.key().map(|k| k.resource.as_str()), Some("db"));

        let composed = DeferredValue::composed(
            "compose(a,b)",
            BTreeSet::from(["a".to_string(), "b".to_string()]),
        );
        assert_eq!(composed.producers().len(), 2);
        assert!(composed.key().is_none());
    }

    #[tokio::test]
    async fn test_wait_suspends_until_resolution() {
        let value = DeferredValue::output("lb", "dns_name");
        let publisher = value.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.resolve(json!("app.elb")).unwrap();
        });

        assert_eq!(value.wait().await, json!("app.elb"));
        handle.await.unwrap();

        // Already resolved: returns immediately
        assert_eq!(value.wait().await, json!("app.elb"));
    }

    #[test]
    fn test_debug_output() {
        let value = DeferredValue::output("vpc", "id");
        assert_eq!(format!("{:?}", value), "DeferredValue(vpc.id, pending)");
        value.resolve(json!("vpc-1")).unwrap();
        assert_eq!(format!("{:?}", value), "DeferredValue(vpc.id = \"vpc-1\")");
    }
}
