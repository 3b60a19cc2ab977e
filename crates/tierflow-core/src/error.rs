use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("IO error: {path}\nreason: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(
        "Address space exhausted: {requested} subnets of /{prefix} do not fit in {parent} (room for {available})"
    )]
    AddressSpaceExhausted {
        parent: String,
        prefix: u8,
        requested: u128,
        available: u128,
    },

    #[error("Cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Deferred value {0} was resolved twice")]
    DoubleResolution(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Engine error: {0}")]
    Engine(#[from] tierflow_cloud::CloudError),
}

impl StackError {
    /// Whether the error was raised before anything was sent to the engine
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            StackError::KdlParse(_)
                | StackError::Configuration(_)
                | StackError::AddressSpaceExhausted { .. }
                | StackError::CyclicDependency { .. }
                | StackError::Template(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
