//! Dependency-ordered provisioning
//!
//! The orchestrator walks a [`DependencyGraph`] and submits each node to the
//! engine once every predecessor has published its attributes. Independent
//! branches run concurrently on a `JoinSet` bounded by
//! [`OrchestratorConfig::concurrency`]; ready nodes are submitted in
//! topological order so runs stay reproducible.

use crate::declaration::ResourceDeclaration;
use crate::error::{Result, StackError};
use crate::graph::DependencyGraph;
use crate::report::{NodeReport, NodeStatus, ProvisionReport, ProvisioningFailure};
use crate::table::ResultTable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tierflow_cloud::{Applied, CloudError, ProvisioningEngine};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// What happens to the rest of the run when a node fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Skip the failed node's dependents, keep provisioning everything else
    #[default]
    Isolate,
    /// Submit nothing new after the first failure
    FailFast,
}

impl std::str::FromStr for FailurePolicy {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "isolate" => Ok(FailurePolicy::Isolate),
            "fail-fast" => Ok(FailurePolicy::FailFast),
            other => Err(StackError::Configuration(format!(
                "unknown failure policy '{}' (expected \"isolate\" or \"fail-fast\")",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Isolate => write!(f, "isolate"),
            FailurePolicy::FailFast => write!(f, "fail-fast"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of engine calls in flight
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Operator abort for a running provisioning pass
///
/// Cancelling lets in-flight engine calls finish; nothing new is submitted.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

type NodeOutcome = (std::result::Result<Applied, CloudError>, Duration);

/// Bookkeeping for one `provision` call
struct Run<'g> {
    graph: &'g DependencyGraph,
    order: Vec<String>,
    position: HashMap<String, usize>,
    remaining: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    ready: BTreeSet<usize>,
    reports: Vec<Option<NodeReport>>,
}

impl<'g> Run<'g> {
    fn new(graph: &'g DependencyGraph, order: Vec<String>) -> Self {
        let position: HashMap<String, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut remaining = vec![0; order.len()];
        let mut dependents = vec![Vec::new(); order.len()];
        for (i, name) in order.iter().enumerate() {
            for pred in graph.predecessors(name).into_iter().flatten() {
                if let Some(&p) = position.get(pred) {
                    remaining[i] += 1;
                    dependents[p].push(i);
                }
            }
        }

        let ready = (0..order.len()).filter(|&i| remaining[i] == 0).collect();
        let reports = vec![None; order.len()];

        Self {
            graph,
            order,
            position,
            remaining,
            dependents,
            ready,
            reports,
        }
    }

    fn declaration(&self, node: usize) -> Option<&'g ResourceDeclaration> {
        self.graph.get(&self.order[node])
    }

    fn record(&mut self, node: usize, report: NodeReport) {
        self.reports[node] = Some(report);
    }

    fn failure(&self, node: usize, cause: String) -> ProvisioningFailure {
        let name = &self.order[node];
        ProvisioningFailure {
            node: name.clone(),
            cause,
            properties: self
                .declaration(node)
                .map(ResourceDeclaration::display_properties)
                .unwrap_or_default(),
            predecessor_chain: self.graph.predecessor_chain(name),
        }
    }

    fn fail(&mut self, node: usize, cause: String, elapsed: Duration) {
        let name = self.order[node].clone();
        let kind = self.kind(node);
        let failure = self.failure(node, cause);
        error!(node = %name, kind = %kind, error = %failure.cause, "Provisioning failed");

        let mut report = NodeReport::new(&name, &kind, NodeStatus::Failed);
        report.error = Some(failure);
        report.duration_ms = elapsed.as_millis() as u64;
        self.record(node, report);

        for descendant in self.graph.descendants(&name) {
            if let Some(&d) = self.position.get(&descendant)
                && self.reports[d].is_none()
            {
                debug!(node = %descendant, failed = %name, "Skipping dependent");
                let mut report = NodeReport::new(&descendant, &self.kind(d), NodeStatus::Skipped);
                report.reason = Some(format!("predecessor '{}' failed", name));
                self.record(d, report);
            }
        }
    }

    /// Mark `node` done and queue the dependents it unblocked
    fn complete(&mut self, node: usize) {
        for &dependent in &self.dependents[node] {
            self.remaining[dependent] -= 1;
            if self.remaining[dependent] == 0 && self.reports[dependent].is_none() {
                self.ready.insert(dependent);
            }
        }
    }

    fn kind(&self, node: usize) -> String {
        self.declaration(node)
            .map(|d| d.kind.clone())
            .unwrap_or_default()
    }

    fn finish(self, status: NodeStatus, reason: Option<String>) -> Vec<NodeReport> {
        let Run {
            graph,
            order,
            reports,
            ..
        } = self;
        order
            .iter()
            .zip(reports)
            .map(|(name, report)| {
                report.unwrap_or_else(|| {
                    let kind = graph.get(name).map(|d| d.kind.as_str()).unwrap_or_default();
                    let mut report = NodeReport::new(name, kind, status);
                    report.reason = reason.clone();
                    report
                })
            })
            .collect()
    }
}

/// Provisions a dependency graph through an engine
pub struct Orchestrator {
    engine: Arc<dyn ProvisioningEngine>,
    config: OrchestratorConfig,
    table: ResultTable,
    cancel: CancelHandle,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ProvisioningEngine>) -> Self {
        Self {
            engine,
            config: OrchestratorConfig::default(),
            table: ResultTable::new(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish into a table the declarations already hold handles from
    pub fn with_table(mut self, table: ResultTable) -> Self {
        self.table = table;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn table(&self) -> &ResultTable {
        &self.table
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Provision every node of `graph`
    ///
    /// Structural problems (cycles, unknown predecessors) are returned as
    /// errors before the engine is called. Engine failures are recorded per
    /// node in the report. Running the same graph again publishes equal
    /// attributes and reports the nodes unchanged; only a published value
    /// that differs from an earlier one (`DoubleResolution`) aborts the run.
    #[instrument(skip(self, graph), fields(nodes = graph.len(), engine = self.engine.name()))]
    pub async fn provision(&self, graph: &DependencyGraph) -> Result<ProvisionReport> {
        let order = graph.topological_order()?;
        let started = Instant::now();
        let limit = self.config.concurrency.max(1);

        info!(
            concurrency = limit,
            policy = %self.config.failure_policy,
            "Starting provisioning"
        );

        let mut run = Run::new(graph, order);
        let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut cancelled = false;
        let mut halted = false;

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                warn!("Provisioning cancelled; waiting for in-flight nodes");
                cancelled = true;
            }

            while !cancelled && !halted && tasks.len() < limit {
                let Some(node) = run.ready.pop_first() else {
                    break;
                };
                let Some(declaration) = run.declaration(node) else {
                    continue;
                };

                let request = match declaration.to_request() {
                    Ok(request) => request,
                    Err(unresolved) => {
                        run.fail(node, format!("unresolved input: {}", unresolved), Duration::ZERO);
                        halted = self.config.failure_policy == FailurePolicy::FailFast;
                        continue;
                    }
                };

                info!(node = %request.name, kind = %request.kind, "Provisioning");
                let engine = self.engine.clone();
                let handle = tasks.spawn(async move {
                    let started = Instant::now();
                    let result = engine.create(&request).await;
                    (result, started.elapsed())
                });
                in_flight.insert(handle.id(), node);
            }

            if tasks.is_empty() {
                break;
            }

            let joined = if cancelled {
                tasks.join_next_with_id().await
            } else {
                tokio::select! {
                    biased;
                    joined = tasks.join_next_with_id() => joined,
                    _ = self.cancel.cancelled() => continue,
                }
            };

            let Some(joined) = joined else {
                break;
            };

            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, Ok(outcome)),
                Err(e) => (e.id(), Err(e)),
            };
            let Some(node) = in_flight.remove(&id) else {
                continue;
            };

            match outcome {
                Ok((Ok(applied), elapsed)) => {
                    let name = run.order[node].clone();
                    self.table.publish(&name, &applied.attributes)?;

                    let status = if applied.has_changes() {
                        NodeStatus::Created
                    } else {
                        NodeStatus::Unchanged
                    };
                    info!(node = %name, action = %applied.action, "Provisioned");

                    let mut report = NodeReport::new(&name, &run.kind(node), status);
                    report.action = Some(applied.action);
                    report.attributes = applied.attributes;
                    report.duration_ms = elapsed.as_millis() as u64;
                    run.record(node, report);
                    run.complete(node);
                }
                Ok((Err(e), elapsed)) => {
                    run.fail(node, e.to_string(), elapsed);
                    halted = self.config.failure_policy == FailurePolicy::FailFast;
                }
                Err(e) => {
                    run.fail(node, format!("provisioning task aborted: {}", e), Duration::ZERO);
                    halted = self.config.failure_policy == FailurePolicy::FailFast;
                }
            }
        }

        let nodes = if cancelled {
            run.finish(NodeStatus::Cancelled, Some("run cancelled".to_string()))
        } else {
            run.finish(
                NodeStatus::Skipped,
                Some("stopped after first failure".to_string()),
            )
        };

        let report = ProvisionReport {
            nodes,
            duration_ms: started.elapsed().as_millis() as u64,
            cancelled,
        };
        info!(summary = %report.summary(), "Provisioning finished");
        Ok(report)
    }
}
