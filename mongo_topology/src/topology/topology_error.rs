use std::sync::Arc;

use crate::{error_chain_fmt, topology_description::TopologyDescription};

#[derive(thiserror::Error)]
pub enum TopologyError {
    #[error("No hosts were supplied and a topology can't exist without at least one seed")]
    MissingHosts,
    #[error("Invalid host `{host}`: {reason}")]
    InvalidHost { host: String, reason: String },
    #[error("Contradictory configuration: {0}")]
    ContradictoryConfiguration(String),
    #[error("Invalid option `{option}`: {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
    },
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),
    #[error("Deployment is incompatible with this driver: {0}")]
    IncompatibleDeployment(String),
    #[error("Invalid read preference: {0}")]
    InvalidReadPreference(String),
    #[error("Invalid max staleness: {0}")]
    InvalidMaxStaleness(String),
    #[error("Server selection timed out after {timeout_ms}ms. Topology: {description}")]
    SelectionTimeout {
        timeout_ms: u128,
        description: Arc<TopologyDescription>,
    },
    #[error("The topology has been shut down")]
    Shutdown,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for TopologyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
