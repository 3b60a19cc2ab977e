//! TierFlow core
//!
//! Topology synthesis and dependency-ordered provisioning:
//!
//! - [`address`]: subnet planning per availability zone
//! - [`declaration`] / [`graph`]: resources and their predecessor edges
//! - [`deferred`] / [`table`] / [`compose`]: write-once values published by
//!   provisioned resources, and payloads rendered from them
//! - [`orchestrator`]: concurrent, fail-isolated provisioning of a graph
//! - [`model`] / [`parser`]: stack settings and their KDL form
//! - [`topology`] / [`stack`]: the multi-tier stack and its `provision` entry point

pub mod address;
pub mod compose;
pub mod declaration;
pub mod deferred;
pub mod error;
pub mod graph;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod report;
pub mod stack;
pub mod table;
pub mod topology;

pub use address::{AddressBlock, Subnet, SubnetPlan, Tier, ZonePolicy};
pub use compose::PayloadComposer;
pub use declaration::{PropertyValue, ResourceDeclaration};
pub use deferred::{DeferredValue, OutputKey, UnresolvedValue};
pub use error::{Result, StackError};
pub use graph::DependencyGraph;
pub use model::*;
pub use orchestrator::{CancelHandle, FailurePolicy, Orchestrator, OrchestratorConfig};
pub use parser::{parse_stack_file, parse_stack_str};
pub use report::{NodeReport, NodeStatus, ProvisionReport, ProvisioningFailure, ReportSummary};
pub use stack::{Stack, StackOutputs, StackPlan, StackRun, provision};
pub use table::ResultTable;
pub use topology::Topology;
