//! Jiva volume upgrade
//!
//! A jiva volume is one controller deployment, one deployment per replica
//! and a controller service, all labelled with the persistent volume name.
//! Replicas are upgraded with the controller scaled down, then the
//! controller comes back at the new version and the replicas resync.

use crate::engine::Upgrader;
use crate::error::UpgradeError;
use crate::helpers::{
    get_deployment, list_deployments, object_name, patch_service, pv_selector, render_patch, require_version,
    resolve_namespace, scale_deployment, version_params,
};
use crate::journal::Journal;
use cluster_gateway::{ListOptions, PatchKind};
use crds::UpgradeStep;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{info, warn};
use workload_patcher::templates::{JIVA_REPLICA_PATCH, JIVA_TARGET_PATCH};
use workload_patcher::{TemplateParams, base_image, first_container_name, has_container};

const CONTROLLER_LABEL: &str = "openebs.io/controller=jiva-controller";
const REPLICA_LABEL: &str = "openebs.io/replica=jiva-replica";
const SERVICE_LABEL: &str = "openebs.io/controller-service=jiva-controller-svc";
const MONITOR_CONTAINER: &str = "maya-volume-exporter";
const REPLICATION_FACTOR_ENV: &str = "REPLICATION_FACTOR";
const REPLICA_STATUS_URL: &str = "http://localhost:9501/v1/replicas";
const SYNC_FAILED: &str = "failed to verify synced replicas. Please check it manually using the steps mentioned in https://docs.openebs.io/docs/next/mayactl.html";

/// Deployment plus the parameters of its patch
#[derive(Debug, Clone)]
struct Workload {
    name: String,
    version: String,
    params: TemplateParams,
}

#[derive(Debug)]
struct JivaVolume {
    namespace: String,
    pv_selector: String,
    controller: Workload,
    replicas: Vec<Workload>,
}

#[derive(Debug, Deserialize)]
struct ReplicaList {
    #[serde(default)]
    data: Vec<ReplicaEntry>,
}

#[derive(Debug, Deserialize)]
struct ReplicaEntry {
    #[serde(default)]
    mode: String,
}

/// Replicas reported in read-write mode by the controller
fn synced_replicas(output: &str) -> Result<usize, UpgradeError> {
    let replicas: ReplicaList = serde_json::from_str(output)?;
    Ok(replicas.data.iter().filter(|replica| replica.mode == "RW").count())
}

/// Replication factor from the controller's first container environment
fn replication_factor(pod: &Pod) -> Result<usize, UpgradeError> {
    let name = pod.metadata.name.as_deref().unwrap_or_default();
    let env = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|container| container.env.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let value = env
        .iter()
        .find(|var| var.name == REPLICATION_FACTOR_ENV)
        .or_else(|| env.first())
        .and_then(|var| var.value.as_deref())
        .ok_or_else(|| UpgradeError::Precondition(format!("missing replication factor for {name}")))?;
    value
        .parse()
        .map_err(|_| UpgradeError::Precondition(format!("invalid replication factor {value} for {name}")))
}

impl Upgrader {
    pub(crate) async fn upgrade_jiva_volume(&self, pv_name: &str, journal: &mut Journal) -> Result<(), UpgradeError> {
        let volume = self.jiva_pre_upgrade(pv_name, journal).await?;
        self.jiva_replica_upgrade(&volume, journal).await?;
        self.jiva_target_upgrade(&volume, journal).await?;
        self.jiva_verify(&volume, journal).await?;
        info!("Upgrade successful for jiva volume {}", pv_name);
        Ok(())
    }

    async fn jiva_pre_upgrade(&self, pv_name: &str, journal: &mut Journal) -> Result<JivaVolume, UpgradeError> {
        let step = UpgradeStep::PreUpgrade;
        let namespace = journal
            .check(
                step,
                "failed to get namespace for pvc deployments",
                resolve_namespace(&self.clients, pv_name, &self.config).await,
            )
            .await?;
        let selector = pv_selector(pv_name);
        let replicas = journal
            .check(
                step,
                "failed to get replica details",
                self.jiva_replicas(&selector, &namespace, pv_name).await,
            )
            .await?;
        let controller = journal
            .check(
                step,
                "failed to get target details",
                self.jiva_controller(&selector, &namespace, pv_name).await,
            )
            .await?;
        journal.completed(step, "Pre-upgrade steps were successful").await?;
        Ok(JivaVolume {
            namespace,
            pv_selector: selector,
            controller,
            replicas,
        })
    }

    async fn jiva_replicas(&self, selector: &str, namespace: &str, pv_name: &str) -> Result<Vec<Workload>, UpgradeError> {
        let deployments = list_deployments(&self.clients, &format!("{REPLICA_LABEL},{selector}"), namespace).await?;
        deployments
            .iter()
            .map(|deployment| -> Result<Workload, UpgradeError> {
                let name = object_name(deployment);
                let version = require_version(deployment)?;
                self.config.check_version(&format!("replica {name}"), &version)?;
                let container = first_container_name(deployment)?;
                let params = TemplateParams {
                    replica_image: base_image(deployment, &container, self.config.image_prefix.as_deref())?,
                    replica_container_name: container,
                    pv_name: pv_name.to_string(),
                    ..version_params(&self.config)
                };
                Ok(Workload { name, version, params })
            })
            .collect()
    }

    async fn jiva_controller(&self, selector: &str, namespace: &str, pv_name: &str) -> Result<Workload, UpgradeError> {
        let deployment = get_deployment(&self.clients, &format!("{CONTROLLER_LABEL},{selector}"), namespace).await?;
        let name = object_name(&deployment);
        let version = require_version(&deployment)?;
        self.config.check_version("controller", &version)?;
        Ok(Workload {
            name,
            version,
            params: self.controller_params(&deployment, pv_name)?,
        })
    }

    fn controller_params(&self, deployment: &Deployment, pv_name: &str) -> Result<TemplateParams, UpgradeError> {
        let prefix = self.config.image_prefix.as_deref();
        let container = first_container_name(deployment)?;
        let monitor = has_container(deployment, MONITOR_CONTAINER);
        let exporter = if monitor {
            base_image(deployment, MONITOR_CONTAINER, prefix)?
        } else {
            String::new()
        };
        Ok(TemplateParams {
            controller_image: base_image(deployment, &container, prefix)?,
            controller_container_name: container,
            is_monitor_enabled: monitor,
            m_exporter_image: exporter,
            pv_name: pv_name.to_string(),
            ..version_params(&self.config)
        })
    }

    async fn jiva_replica_upgrade(&self, volume: &JivaVolume, journal: &mut Journal) -> Result<(), UpgradeError> {
        let step = UpgradeStep::ReplicaUpgrade;
        journal.waiting(step).await?;

        // A controller already at the target means the replicas went before it
        if volume.controller.version == self.config.to_version {
            return journal.completed(step, "Replica upgrade was successful").await;
        }

        journal
            .check(
                step,
                "failed to get scale down target deployment",
                scale_deployment(&self.patcher, &volume.controller.name, &volume.namespace, 0).await,
            )
            .await?;
        for replica in &volume.replicas {
            let result = self.patch_jiva_replica(replica, &volume.namespace).await;
            journal
                .check(step, &format!("failed to patch replica depoyment {}", replica.name), result)
                .await?;
        }
        journal.completed(step, "Replica upgrade was successful").await
    }

    async fn patch_jiva_replica(&self, replica: &Workload, namespace: &str) -> Result<(), UpgradeError> {
        if !self.config.needs_upgrade(&replica.version) {
            info!(
                "replica deployment {} already in {} version",
                replica.name, self.config.to_version
            );
            return Ok(());
        }
        let patch = render_patch(JIVA_REPLICA_PATCH, &replica.params, PatchKind::StrategicMerge)?;
        self.patcher.patch_deployment(&replica.name, namespace, &patch).await?;
        info!("Replica deployment {} patched", replica.name);
        Ok(())
    }

    async fn jiva_target_upgrade(&self, volume: &JivaVolume, journal: &mut Journal) -> Result<(), UpgradeError> {
        let step = UpgradeStep::TargetUpgrade;
        journal.waiting(step).await?;
        journal
            .check(
                step,
                "failed to patch target depoyment",
                self.patch_jiva_controller(&volume.controller, &volume.namespace).await,
            )
            .await?;
        let service_selector = format!("{SERVICE_LABEL},{}", volume.pv_selector);
        journal
            .check(
                step,
                "failed to patch target service",
                patch_service(&self.clients, &service_selector, &volume.namespace, &self.config).await,
            )
            .await?;
        journal.completed(step, "Target upgrade was successful").await
    }

    async fn patch_jiva_controller(&self, controller: &Workload, namespace: &str) -> Result<(), UpgradeError> {
        if !self.config.needs_upgrade(&controller.version) {
            info!(
                "controller deployment {} already in {} version",
                controller.name, self.config.to_version
            );
            return Ok(());
        }
        let patch = render_patch(JIVA_TARGET_PATCH, &controller.params, PatchKind::StrategicMerge)?;
        self.patcher.patch_deployment(&controller.name, namespace, &patch).await?;
        info!("Controller deployment {} patched", controller.name);
        Ok(())
    }

    async fn jiva_verify(&self, volume: &JivaVolume, journal: &mut Journal) -> Result<(), UpgradeError> {
        let step = UpgradeStep::Verify;
        sleep(self.config.verify_settle).await;
        journal.waiting(step).await?;
        match self.wait_for_synced_replicas(volume).await {
            Ok(()) => journal.completed(step, "Replica sync was successful").await,
            Err(e) if e.is_forbidden() => {
                warn!("Skipping replica sync verification for {}: {}", volume.controller.name, e);
                journal
                    .completed(step, "Replica sync was not verified, exec into the target pod is forbidden")
                    .await
            }
            Err(e) => Err(journal.fail(step, SYNC_FAILED, e).await),
        }
    }

    /// Poll the controller until every replica is in read-write mode
    async fn wait_for_synced_replicas(&self, volume: &JivaVolume) -> Result<(), UpgradeError> {
        let selector = format!("{CONTROLLER_LABEL},{}", volume.pv_selector);
        let pods = self
            .clients
            .pods
            .list(Some(&volume.namespace), &ListOptions::labels(&selector))
            .await?;
        let pod = pods.first().ok_or_else(|| {
            UpgradeError::Precondition(format!("no target pod found for {selector} in {}", volume.namespace))
        })?;
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let factor = replication_factor(pod)?;
        let command = ["curl", REPLICA_STATUS_URL].map(String::from);

        let mut quorum = false;
        loop {
            let output = self
                .clients
                .exec
                .exec(&volume.namespace, &pod_name, None, &command)
                .await?;
            let synced = synced_replicas(&output)?;
            if !quorum && synced > factor / 2 {
                info!("Synced replica quorum is reached");
                quorum = true;
            }
            if synced >= factor {
                info!("All {} replicas of {} are synced", factor, volume.controller.name);
                return Ok(());
            }
            info!("Waiting for replicas to sync, {} of {} in RW mode", synced, factor);
            sleep(self.config.poll_interval).await;
        }
    }
}
