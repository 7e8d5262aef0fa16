//! Controller-specific error types.
//!
//! Errors returned by sync handlers decide what the worker does with the
//! queue item: structural errors are dropped, everything else is requeued
//! with backoff.

use cluster_gateway::GatewayError;
use pool_tools::ToolError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the replica controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster store error
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// zpool/zfs invocation failed
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Kubernetes client error outside the gateway (watch setup)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The resource spec cannot be acted on
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Queue item that can never be processed
    #[error("Structural error: {0}")]
    Structural(String),

    /// Informer cache did not sync in time
    #[error("Timed out after {0:?} waiting for caches to sync")]
    CacheSyncTimeout(Duration),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ControllerError {
    /// Whether the worker should requeue the item
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ControllerError::Structural(_) | ControllerError::Gateway(GatewayError::Invalid(_))
        )
    }
}
