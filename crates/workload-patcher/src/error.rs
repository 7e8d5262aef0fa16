//! Patcher errors

use cluster_gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    /// The API server refused the patch
    #[error("Patch rejected for {name}: {source}")]
    PatchRejected {
        name: String,
        #[source]
        source: GatewayError,
    },

    /// The deployment did not roll out within the attempt budget
    #[error("Rollout of {name} did not complete: {message}")]
    RolloutTimeout { name: String, message: String },

    /// The named container is not part of the pod template
    #[error("image not found for container {0}")]
    MissingContainer(String),

    /// Template could not be parsed or rendered
    #[error("Template error: {0}")]
    Template(String),

    /// Rendered output was not valid JSON
    #[error("Rendered patch is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
