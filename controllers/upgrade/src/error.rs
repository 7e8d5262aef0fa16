//! Upgrade engine errors.
//!
//! The `Display` text of an error becomes the reason of the journal entry
//! written for the failing step, so variants that describe a precondition
//! carry the full human readable sentence.

use cluster_gateway::GatewayError;
use thiserror::Error;
use workload_patcher::PatchError;

/// Errors that can occur while upgrading a resource
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Cluster store error
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Patch rendering, patching or rollout failure
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    /// Source or target version outside the supported range
    #[error("{0}")]
    InvalidVersion(String),

    /// Kind not handled by the engine
    #[error("Invalid kind for upgrade")]
    InvalidKind,

    /// The resource is not in a state the step can act on
    #[error("{0}")]
    Precondition(String),

    /// Journal entry rejected before it was written
    #[error("failed to update upgradetask status: invalid status {0}")]
    InvalidJournalEntry(String),

    /// Replica status endpoint returned something unexpected
    #[error("Invalid replica status response: {0}")]
    ReplicaStatus(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl UpgradeError {
    /// Whether the cluster refused the operation for lack of permission
    pub fn is_forbidden(&self) -> bool {
        matches!(self, UpgradeError::Gateway(e) if e.is_forbidden())
    }

    /// Journal reason for this error: the message with every ':' removed
    pub fn reason(&self) -> String {
        strip_colons(&self.to_string())
    }
}

/// Remove every ':' so the text is accepted as a journal reason
pub fn strip_colons(text: &str) -> String {
    text.replace(':', "")
}
