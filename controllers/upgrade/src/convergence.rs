//! Waits on the version reconcile of versioned resources

use crate::config::UpgradeConfig;
use crate::error::UpgradeError;
use crate::helpers::{object_name, render_patch, version_label, version_params};
use crate::journal::Journal;
use cluster_gateway::{PatchKind, ResourceGateway};
use crds::{UpgradeStep, Versioned};
use kube::Resource;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};
use workload_patcher::templates::VERSION_DETAILS_PATCH;

/// Poll `name` until its reconciler reports a running version
pub async fn wait_for_current_version<K>(
    gateway: &dyn ResourceGateway<K>,
    name: &str,
    namespace: Option<&str>,
    interval: Duration,
) -> Result<K, UpgradeError>
where
    K: Versioned + Send + Sync + 'static,
{
    loop {
        let object = gateway.get(name, namespace).await?;
        if !object.current_version().is_empty() {
            return Ok(object);
        }
        info!("Waiting for current version of {} to get populated", name);
        sleep(interval).await;
    }
}

/// Ask the reconciler of `object` to move to the target version
///
/// Nothing is written when the object already runs or labels the target version.
pub async fn request_version<K>(
    gateway: &dyn ResourceGateway<K>,
    object: &K,
    config: &UpgradeConfig,
) -> Result<(), UpgradeError>
where
    K: Resource + Versioned + Send + Sync + 'static,
{
    let name = object_name(object);
    if version_label(object) == config.to_version || object.current_version() == config.to_version {
        info!("{} already in {} version", name, config.to_version);
        return Ok(());
    }
    let patch = render_patch(VERSION_DETAILS_PATCH, &version_params(config), PatchKind::Merge)?;
    gateway.patch(&name, object.meta().namespace.as_deref(), &patch).await?;
    info!("Requested version {} for {}", config.to_version, name);
    Ok(())
}

/// Poll `name` until it runs version `to`
///
/// Reconcile failures reported on the object are written to the journal as
/// errored `step` entries while polling continues. A failed read is recorded
/// with `get_failure` and ends the wait.
#[allow(clippy::too_many_arguments)]
pub async fn wait_for_reconcile<K>(
    gateway: &dyn ResourceGateway<K>,
    name: &str,
    namespace: Option<&str>,
    to: &str,
    interval: Duration,
    journal: &mut Journal,
    step: UpgradeStep,
    get_failure: &str,
) -> Result<(), UpgradeError>
where
    K: Versioned + Send + Sync + 'static,
{
    loop {
        let object = match gateway.get(name, namespace).await {
            Ok(object) => object,
            Err(e) => return Err(journal.fail(step, get_failure, e.into()).await),
        };
        if object.current_version() == to {
            info!("Version of {} reconciled to {}", name, to);
            return Ok(());
        }

        let status = &object.version_details().status;
        if !status.message.is_empty() {
            let reason = if status.reason.is_empty() {
                &status.message
            } else {
                &status.reason
            };
            error!("Failed to reconcile version of {}: {}", name, reason);
            journal.errored(step, &status.message, reason).await?;
        }
        info!("Verifying the reconciliation of version for {}", name);
        sleep(interval).await;
    }
}
