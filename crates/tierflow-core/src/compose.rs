//! Payload composition
//!
//! Renders a Tera template once every deferred input is known, producing a
//! new [`DeferredValue`]. Typical use is baking a database's endpoint and
//! generated credentials into an instance's bootstrap script before the
//! instance is created.

use crate::deferred::DeferredValue;
use crate::error::{Result, StackError};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use tera::{Context, Tera};
use tracing::{debug, error};

const TEMPLATE_NAME: &str = "payload";

/// Placeholder rendered during validation; never reaches a resource
const VALIDATION_PLACEHOLDER: &str = "__deferred__";

/// Composes templates from static settings and deferred values
#[derive(Debug, Clone, Default)]
pub struct PayloadComposer {
    statics: BTreeMap<String, Value>,
}

struct Collector {
    remaining: usize,
    values: Vec<Option<Value>>,
}

impl PayloadComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value known up front (app port, database name, ...)
    pub fn with_static(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.statics.insert(key.into(), value.into());
        self
    }

    /// Returns a value that resolves to the rendered template once every
    /// input has resolved. Never blocks; the template is checked eagerly so
    /// undefined placeholders fail here rather than at provisioning time.
    pub fn compose<I, K>(&self, template: &str, inputs: I) -> Result<DeferredValue>
    where
        I: IntoIterator<Item = (K, DeferredValue)>,
        K: Into<String>,
    {
        let inputs: Vec<(String, DeferredValue)> =
            inputs.into_iter().map(|(k, v)| (k.into(), v)).collect();

        let mut seen = BTreeSet::new();
        for (name, _) in &inputs {
            if !seen.insert(name.as_str()) || self.statics.contains_key(name) {
                return Err(StackError::Template(format!(
                    "placeholder '{}' is bound more than once",
                    name
                )));
            }
        }

        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, template)
            .map_err(|e| StackError::Template(describe_tera_error(&e)))?;

        let placeholders: Vec<Value> = inputs
            .iter()
            .map(|_| Value::String(VALIDATION_PLACEHOLDER.to_string()))
            .collect();
        let names: Vec<String> = inputs.iter().map(|(name, _)| name.clone()).collect();
        render(&tera, &self.statics, &names, &placeholders)?;

        let producers: BTreeSet<String> = inputs.iter().flat_map(|(_, v)| v.producers()).collect();
        let label = format!("compose({})", names.join(","));
        let output = DeferredValue::composed(label, producers);

        if inputs.is_empty() {
            let rendered = render(&tera, &self.statics, &names, &[])?;
            output.resolve(Value::String(rendered))?;
            return Ok(output);
        }

        let collector = Arc::new(Mutex::new(Collector {
            remaining: inputs.len(),
            values: vec![None; inputs.len()],
        }));
        let tera = Arc::new(tera);
        let statics = Arc::new(self.statics.clone());
        let names = Arc::new(names);

        for (index, (_, input)) in inputs.iter().enumerate() {
            let collector = collector.clone();
            let tera = tera.clone();
            let statics = statics.clone();
            let names = names.clone();
            let output = output.clone();

            input.on_resolve(move |value| {
                let complete = {
                    let mut state = collector.lock().unwrap_or_else(PoisonError::into_inner);
                    if state.values[index].is_some() {
                        return;
                    }
                    state.values[index] = Some(value.clone());
                    state.remaining -= 1;
                    if state.remaining > 0 {
                        return;
                    }
                    state.values.iter().flatten().cloned().collect::<Vec<_>>()
                };

                match render(&tera, &statics, &names, &complete) {
                    Ok(rendered) => {
                        debug!(payload = %output.label(), "Composed payload");
                        if let Err(e) = output.resolve(Value::String(rendered)) {
                            error!(error = %e, "Composed payload resolved twice");
                        }
                    }
                    Err(e) => {
                        error!(payload = %output.label(), error = %e, "Failed to render payload");
                    }
                }
            });
        }

        Ok(output)
    }
}

fn render(
    tera: &Tera,
    statics: &BTreeMap<String, Value>,
    names: &[String],
    values: &[Value],
) -> Result<String> {
    let mut context = Context::new();
    for (key, value) in statics {
        context.insert(key.as_str(), &as_text(value));
    }
    for (name, value) in names.iter().zip(values) {
        context.insert(name.as_str(), &as_text(value));
    }

    tera.render(TEMPLATE_NAME, &context)
        .map_err(|e| StackError::Template(describe_tera_error(&e)))
}

/// Strings are inserted verbatim, everything else as its JSON text
fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn describe_tera_error(e: &tera::Error) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCRIPT: &str = "DB_HOST={{ db_host }}\nDB_USER={{ db_user }}\nDB_PASSWORD={{ db_password }}\n";

    fn inputs() -> (DeferredValue, DeferredValue) {
        (
            DeferredValue::output("db", "address"),
            DeferredValue::output("db-password", "result"),
        )
    }

    #[test]
    fn test_pending_until_all_inputs_resolve() {
        let (host, password) = inputs();
        let composer = PayloadComposer::new().with_static("db_user", "app");

        let payload = composer
            .compose(
                SCRIPT,
                [("db_host", host.clone()), ("db_password", password.clone())],
            )
            .unwrap();
        assert!(!payload.is_resolved());

        host.resolve(json!("db.internal")).unwrap();
        assert!(!payload.is_resolved());

        password.resolve(json!("s3cret")).unwrap();
        assert_eq!(
            payload.get(),
            Some(json!("DB_HOST=db.internal\nDB_USER=app\nDB_PASSWORD=s3cret\n"))
        );
    }

    #[test]
    fn test_resolution_order_does_not_matter() {
        let mut rendered = Vec::new();
        for reverse in [false, true] {
            let (host, password) = inputs();
            let payload = PayloadComposer::new()
                .with_static("db_user", "app")
                .compose(
                    SCRIPT,
                    [("db_host", host.clone()), ("db_password", password.clone())],
                )
                .unwrap();

            if reverse {
                password.resolve(json!("pw")).unwrap();
                host.resolve(json!("h")).unwrap();
            } else {
                host.resolve(json!("h")).unwrap();
                password.resolve(json!("pw")).unwrap();
            }
            rendered.push(payload.get().unwrap());
        }
        assert_eq!(rendered[0], rendered[1]);
    }

    #[test]
    fn test_producers_are_merged() {
        let (host, password) = inputs();
        let payload = PayloadComposer::new()
            .with_static("db_user", "app")
            .compose(SCRIPT, [("db_host", host), ("db_password", password)])
            .unwrap();

        assert_eq!(
            payload.producers(),
            BTreeSet::from(["db".to_string(), "db-password".to_string()])
        );
    }

    #[test]
    fn test_undefined_placeholder_fails_eagerly() {
        let (host, _) = inputs();
        let result =
            PayloadComposer::new().compose("{{ db_host }} {{ db_port }}", [("db_host", host)]);
        assert!(matches!(result, Err(StackError::Template(_))));
    }

    #[test]
    fn test_duplicate_binding_fails() {
        let (host, password) = inputs();
        let result = PayloadComposer::new()
            .with_static("db_host", "static")
            .compose("{{ db_host }}", [("db_host", host.clone())]);
        assert!(matches!(result, Err(StackError::Template(_))));

        let result = PayloadComposer::new()
            .compose("{{ db_host }}", [("db_host", host), ("db_host", password)]);
        assert!(matches!(result, Err(StackError::Template(_))));
    }

    #[test]
    fn test_static_only_template_resolves_immediately() {
        let payload = PayloadComposer::new()
            .with_static("port", 8080)
            .compose("listen {{ port }}", Vec::<(String, DeferredValue)>::new())
            .unwrap();
        assert_eq!(payload.get(), Some(json!("listen 8080")));
    }

    #[test]
    fn test_composed_values_can_feed_other_compositions() {
        let host = DeferredValue::output("db", "address");
        let port = DeferredValue::output("db", "port");
        let endpoint = PayloadComposer::new()
            .compose("{{ host }}:{{ port }}", [("host", host.clone()), ("port", port.clone())])
            .unwrap();
        let url = PayloadComposer::new()
            .compose("postgres://{{ endpoint }}/app", [("endpoint", endpoint)])
            .unwrap();

        port.resolve(json!(5432)).unwrap();
        host.resolve(json!("db.internal")).unwrap();

        assert_eq!(url.get(), Some(json!("postgres://db.internal:5432/app")));
    }
}
