//! TierFlow provisioning engine abstraction
//!
//! TierFlow decides *what* to create and *in which order*; the actual
//! create/update mechanics, credentials and state live behind the
//! [`ProvisioningEngine`] trait defined here.
//!
//! # Engines
//!
//! - **LocalEngine**: state-backed simulation, persists to `.tierflow/state.json`
//! - **CommandEngine**: forwards every call to an external executable (JSON over stdio)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   tier CLI                       │
//! │               (tier plan / tier up)              │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 tierflow-core                    │
//! │   address plan → graph → orchestrator            │
//! └─────────────────┬───────────────────────────────┘
//!                   │ create / zones / image
//! ┌─────────────────▼───────────────────────────────┐
//! │                tierflow-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   trait ProvisioningEngine { ... }        │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ LocalEngine  │  │CommandEngine │            │
//! │  └──────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod command;
pub mod engine;
pub mod error;
pub mod kind;
pub mod local;
pub mod state;

// Re-exports
pub use action::{ActionType, Applied, Attributes};
pub use command::CommandEngine;
pub use engine::{CreateRequest, ImageFilter, ProvisioningEngine, RetryConfig};
pub use error::{CloudError, Result};
pub use local::{LocalEngine, LocalImage};
pub use state::{ResourceRecord, StateFile, StateLock, StateManager};
