//! Upgrade engine entry point
//!
//! `Upgrader::exec` validates the request, opens the task journal, checks
//! that the control plane already runs the target version and hands over
//! to the per-kind upgrade. Failed attempts are counted against the
//! backoff limit of the job running the upgrade.

use crate::config::{DEFAULT_BASE_DIR, ResourceKind, UpgradeConfig};
use crate::error::UpgradeError;
use crate::helpers::version_label;
use crate::journal::Journal;
use cluster_gateway::{ClusterClients, ListOptions};
use crds::labels::CONTROL_PLANE_SELECTOR;
use crds::{UpgradeStep, UpgradeTask};
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use tracing::{debug, error, info};
use workload_patcher::DeploymentPatcher;

/// Backoff limit assumed when the job does not set one
pub const DEFAULT_BACKOFF_LIMIT: u32 = 6;

const BASE_DIR_ENV: &str = "OPENEBS_IO_BASE_DIR";

/// Base directory advertised by the control plane pod
fn base_dir(pod: &Pod) -> String {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|container| container.env.as_ref())
        .and_then(|env| env.iter().find(|var| var.name == BASE_DIR_ENV))
        .and_then(|var| var.value.clone())
        .filter(|dir| !dir.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_DIR.to_string())
}

/// Kind, name and configuration requested by an existing upgrade task
#[derive(Debug)]
pub struct TaskRequest {
    pub kind: ResourceKind,
    pub name: String,
    pub config: UpgradeConfig,
}

impl TaskRequest {
    /// Read the request out of `task`; exactly one resource must be named
    pub fn from_task(task: &UpgradeTask, namespace: &str) -> Result<Self, UpgradeError> {
        let spec = &task.spec;
        let resource = &spec.resource;
        let (kind, name, options) = if let Some(target) = &resource.jiva_volume {
            (ResourceKind::JivaVolume, &target.pv_name, &target.options)
        } else if let Some(target) = &resource.cstor_volume {
            (ResourceKind::CstorVolume, &target.pv_name, &target.options)
        } else if let Some(target) = &resource.cstor_pool {
            (ResourceKind::CstorPool, &target.pool_name, &target.options)
        } else if let Some(target) = &resource.storage_pool_claim {
            (ResourceKind::StoragePoolClaim, &target.spc_name, &target.options)
        } else {
            return Err(UpgradeError::InvalidKind);
        };

        if let Some(timeout) = spec.options.as_ref().and_then(|options| options.timeout) {
            info!("Upgrade task timeout: {}s", timeout);
        }
        if let Some(steps) = options
            .as_ref()
            .map(|options| &options.ignore_steps_on_error)
            .filter(|steps| !steps.is_empty())
        {
            info!("Steps to ignore on error: {:?}", steps);
        }

        let mut config = UpgradeConfig::new(&spec.from_version, &spec.to_version, namespace);
        config.image_prefix = spec.image_prefix.clone();
        config.image_tag = spec.image_tag.clone();
        Ok(Self {
            kind,
            name: name.clone(),
            config,
        })
    }
}

/// Runs upgrades against one cluster
#[derive(Debug)]
pub struct Upgrader {
    pub(crate) clients: ClusterClients,
    pub(crate) patcher: DeploymentPatcher,
    pub(crate) config: UpgradeConfig,
}

impl Upgrader {
    pub fn new(clients: ClusterClients, config: UpgradeConfig) -> Self {
        let patcher = DeploymentPatcher::new(Arc::clone(&clients.deployments), config.rollout);
        Self {
            clients,
            patcher,
            config,
        }
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    /// Upgrade resource `name` of `kind`
    pub async fn exec(&mut self, kind: &str, name: &str) -> Result<(), UpgradeError> {
        self.config.validate()?;
        let kind: ResourceKind = kind.parse()?;
        info!(
            "Upgrading {} {} from {} to {}",
            kind, name, self.config.from_version, self.config.to_version
        );

        let tasks = Arc::clone(&self.clients.upgrade_tasks);
        // Claims journal through the tasks of their pools
        let mut journal = if kind == ResourceKind::StoragePoolClaim {
            Journal::detached(tasks, self.config.task_label_present)
        } else {
            let mut journal = Journal::open(tasks, kind, name, &self.config).await?;
            journal.waiting(UpgradeStep::PreUpgrade).await?;
            journal
        };

        let result = match self.probe_control_plane().await {
            Ok(base_dir) => {
                debug!("Using base directory {}", base_dir);
                self.config.base_dir = base_dir;
                self.dispatch(kind, name, &mut journal).await
            }
            Err(e) => Err(journal
                .fail(UpgradeStep::PreUpgrade, "failed to verify maya-apiserver pod", e)
                .await),
        };

        match result {
            Ok(()) => {
                journal.mark_success().await?;
                info!("Upgrade of {} {} to {} was successful", kind, name, self.config.to_version);
                Ok(())
            }
            Err(e) => {
                error!("Upgrade of {} {} failed: {}", kind, name, e);
                if journal.has_task() && self.config.task_label_present {
                    match self.backoff_limit().await {
                        Ok(limit) => journal.record_retry(limit).await?,
                        Err(limit_err) => error!("Failed to get backoff limit: {}", limit_err),
                    }
                }
                Err(e)
            }
        }
    }

    async fn dispatch(&self, kind: ResourceKind, name: &str, journal: &mut Journal) -> Result<(), UpgradeError> {
        match kind {
            ResourceKind::JivaVolume => self.upgrade_jiva_volume(name, journal).await,
            ResourceKind::CstorVolume => self.upgrade_cstor_volume(name, journal).await,
            ResourceKind::CstorPool => self.upgrade_cstor_pool(name, journal).await,
            ResourceKind::StoragePoolClaim => self.upgrade_pool_claim(name, journal).await,
        }
    }

    /// The control plane must be a single pod at the target version
    ///
    /// Returns the base directory it advertises.
    async fn probe_control_plane(&self) -> Result<String, UpgradeError> {
        let namespace = &self.config.namespace;
        let pods = self
            .clients
            .pods
            .list(Some(namespace), &ListOptions::labels(CONTROL_PLANE_SELECTOR))
            .await
            .map_err(|e| UpgradeError::Precondition(format!("failed to get maya-apiserver deployment: {e}")))?;
        match pods.as_slice() {
            [] => Err(UpgradeError::Precondition(format!(
                "failed to get maya-apiserver deployment in {namespace}"
            ))),
            [pod] => {
                let version = version_label(pod);
                if version != self.config.to_version {
                    return Err(UpgradeError::Precondition(format!(
                        "maya-apiserver deployment is in {} but required version is {}",
                        version, self.config.to_version
                    )));
                }
                Ok(base_dir(pod))
            }
            _ => Err(UpgradeError::Precondition(
                "control plane upgrade is not complete try after some time".to_string(),
            )),
        }
    }

    /// Backoff limit of the job owning this upgrade's pod
    async fn backoff_limit(&self) -> Result<u32, UpgradeError> {
        let pod_name = self
            .config
            .pod_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| UpgradeError::InvalidConfig("POD_NAME is not set".to_string()))?;
        let namespace = Some(self.config.namespace.as_str());
        let pod = self.clients.pods.get(pod_name, namespace).await?;
        let owner = pod
            .metadata
            .owner_references
            .as_ref()
            .and_then(|owners| owners.first())
            .ok_or_else(|| UpgradeError::Precondition(format!("no owner found for pod {pod_name}")))?;
        let job = self.clients.jobs.get(&owner.name, namespace).await?;
        Ok(job
            .spec
            .and_then(|spec| spec.backoff_limit)
            .and_then(|limit| u32::try_from(limit).ok())
            .unwrap_or(DEFAULT_BACKOFF_LIMIT))
    }
}
