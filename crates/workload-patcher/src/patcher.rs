//! Deployment patching with rollout verification

use crate::error::PatchError;
use crate::rollout::{RolloutStatus, rollout_status};
use cluster_gateway::{PatchBody, ResourceGateway};
use k8s_openapi::api::apps::v1::Deployment;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rollout polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutPolicy {
    /// Delay between polls
    pub interval: Duration,
    /// Maximum number of polls
    pub attempts: u32,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            attempts: 60,
        }
    }
}

/// Applies patches to deployments and waits for them to roll out
#[derive(Clone)]
pub struct DeploymentPatcher {
    deployments: Arc<dyn ResourceGateway<Deployment>>,
    policy: RolloutPolicy,
}

impl std::fmt::Debug for DeploymentPatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentPatcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DeploymentPatcher {
    pub fn new(deployments: Arc<dyn ResourceGateway<Deployment>>, policy: RolloutPolicy) -> Self {
        Self { deployments, policy }
    }

    pub fn policy(&self) -> RolloutPolicy {
        self.policy
    }

    /// Patch deployment `name` and wait until it has rolled out
    pub async fn patch_deployment(&self, name: &str, namespace: &str, patch: &PatchBody) -> Result<(), PatchError> {
        debug!("Patching deployment {}/{} ({:?})", namespace, name, patch.kind);
        self.deployments
            .patch(name, Some(namespace), patch)
            .await
            .map_err(|source| PatchError::PatchRejected {
                name: name.to_string(),
                source,
            })?;
        self.wait_for_rollout(name, namespace).await
    }

    /// Current rollout status of deployment `name`
    pub async fn rollout_status(&self, name: &str, namespace: &str) -> Result<RolloutStatus, PatchError> {
        let deployment = self.deployments.get(name, Some(namespace)).await?;
        Ok(rollout_status(&deployment))
    }

    /// Poll until the deployment reports rolled out or the budget is spent
    pub async fn wait_for_rollout(&self, name: &str, namespace: &str) -> Result<(), PatchError> {
        let mut last_message = String::from("rollout status was never observed");
        for attempt in 1..=self.policy.attempts {
            match self.rollout_status(name, namespace).await {
                Ok(status) if status.is_rolled_out => {
                    info!("Deployment {}/{} rolled out", namespace, name);
                    return Ok(());
                }
                Ok(status) => {
                    debug!(
                        "Deployment {}/{} not rolled out (attempt {}/{}): {}",
                        namespace, name, attempt, self.policy.attempts, status.message
                    );
                    last_message = status.message;
                }
                Err(e) => {
                    warn!("Failed to read rollout status of {}/{}: {}", namespace, name, e);
                    last_message = e.to_string();
                }
            }
            if attempt < self.policy.attempts {
                tokio::time::sleep(self.policy.interval).await;
            }
        }
        Err(PatchError::RolloutTimeout {
            name: name.to_string(),
            message: last_message,
        })
    }
}
