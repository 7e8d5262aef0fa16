//! cStor volume upgrade
//!
//! Every pool hosting a replica must already run the target version. The
//! replicas are then moved through their reconciler one by one, followed
//! by the target deployment, its service and the volume resource.

use crate::convergence::{request_version, wait_for_current_version, wait_for_reconcile};
use crate::engine::Upgrader;
use crate::error::UpgradeError;
use crate::helpers::{
    get_deployment, object_name, patch_service, pv_selector, render_patch, require_version, resolve_namespace,
    version_label, version_params,
};
use crate::journal::Journal;
use cluster_gateway::{ListOptions, PatchKind};
use crds::labels::{CSTOR_POOL_LABEL, CSTOR_POOL_NAME_LABEL, PERSISTENT_VOLUME_LABEL, label};
use crds::{UpgradeStep, Volume, VolumeReplica};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::info;
use workload_patcher::templates::CSTOR_TARGET_PATCH;
use workload_patcher::{TemplateParams, base_image, has_container};

const TARGET_LABEL: &str = "openebs.io/target=cstor-target";
const TARGET_SERVICE_LABEL: &str = "openebs.io/target-service=cstor-target-svc";
const ISTGT_CONTAINER: &str = "cstor-istgt";
const MONITOR_CONTAINER: &str = "maya-volume-exporter";
const VOLUME_MGMT_CONTAINER: &str = "cstor-volume-mgmt";

#[derive(Debug)]
struct CstorVolume {
    pv_name: String,
    namespace: String,
    pv_selector: String,
    target: Deployment,
    replicas: Vec<VolumeReplica>,
    volume: Volume,
}

impl Upgrader {
    pub(crate) async fn upgrade_cstor_volume(&self, pv_name: &str, journal: &mut Journal) -> Result<(), UpgradeError> {
        let volume = self.cstor_volume_pre_upgrade(pv_name, journal).await?;
        self.cstor_replica_upgrade(&volume, journal).await?;
        self.cstor_target_upgrade(&volume, journal).await?;
        info!("Upgrade successful for cstor volume {}", pv_name);
        Ok(())
    }

    async fn cstor_volume_pre_upgrade(&self, pv_name: &str, journal: &mut Journal) -> Result<CstorVolume, UpgradeError> {
        let step = UpgradeStep::PreUpgrade;
        let namespace = journal
            .check(
                step,
                "failed to get namespace for pvc deployments",
                resolve_namespace(&self.clients, pv_name, &self.config).await,
            )
            .await?;
        let selector = pv_selector(pv_name);
        let target = journal
            .check(
                step,
                "failed to get target details",
                self.cstor_target(&selector, &namespace).await,
            )
            .await?;
        let replicas = journal
            .check(step, "failed to get replica details", self.volume_replicas(&selector).await)
            .await?;
        journal
            .check(
                step,
                "failed to verify csp for cstor volume",
                self.verify_replica_pools(&replicas).await,
            )
            .await?;
        let volume = journal
            .check(step, "failed to get cstorvolume", self.cstor_volume(&selector, &namespace).await)
            .await?;
        journal.completed(step, "Pre-upgrade steps were successful").await?;
        Ok(CstorVolume {
            pv_name: pv_name.to_string(),
            namespace,
            pv_selector: selector,
            target,
            replicas,
            volume,
        })
    }

    async fn cstor_target(&self, selector: &str, namespace: &str) -> Result<Deployment, UpgradeError> {
        let target = get_deployment(&self.clients, &format!("{selector},{TARGET_LABEL}"), namespace).await?;
        let version = require_version(&target)?;
        self.config
            .check_version(&format!("target deployment {}", object_name(&target)), &version)?;
        Ok(target)
    }

    async fn volume_replicas(&self, selector: &str) -> Result<Vec<VolumeReplica>, UpgradeError> {
        let namespace = self.config.namespace.as_str();
        let replicas = self
            .clients
            .volume_replicas
            .list(Some(namespace), &ListOptions::labels(selector))
            .await?;
        if replicas.is_empty() {
            return Err(UpgradeError::Precondition(format!(
                "no cvr found for label {selector} in {namespace}"
            )));
        }
        for replica in &replicas {
            let name = object_name(replica);
            self.config
                .check_version(&format!("cstorvolumereplica {name}"), version_label(replica))?;
        }
        Ok(replicas)
    }

    /// Pools hosting the replicas must be upgraded first
    async fn verify_replica_pools(&self, replicas: &[VolumeReplica]) -> Result<(), UpgradeError> {
        for replica in replicas {
            let replica_name = object_name(replica);
            let pool = label(&replica.metadata, CSTOR_POOL_NAME_LABEL)
                .filter(|pool| !pool.is_empty())
                .ok_or_else(|| UpgradeError::Precondition(format!("missing csp name for {replica_name}")))?;
            let deployment = get_deployment(
                &self.clients,
                &format!("{CSTOR_POOL_LABEL}={pool}"),
                &self.config.namespace,
            )
            .await
            .map_err(|e| UpgradeError::Precondition(format!("failed to get deployment for csp {pool}: {e}")))?;
            if version_label(&deployment) != self.config.to_version {
                return Err(UpgradeError::Precondition(format!(
                    "csp deployment {} not in {} version",
                    object_name(&deployment),
                    self.config.to_version
                )));
            }
        }
        Ok(())
    }

    async fn cstor_volume(&self, selector: &str, namespace: &str) -> Result<Volume, UpgradeError> {
        let mut volumes = self
            .clients
            .volumes
            .list(Some(namespace), &ListOptions::labels(selector))
            .await?;
        if volumes.len() != 1 {
            return Err(UpgradeError::Precondition(format!(
                "invalid number of cstorvolume found {}",
                volumes.len()
            )));
        }
        let volume = volumes.swap_remove(0);
        self.config.check_version(
            &format!("cstorvolume {}", object_name(&volume)),
            version_label(&volume),
        )?;
        Ok(volume)
    }

    async fn cstor_replica_upgrade(&self, volume: &CstorVolume, journal: &mut Journal) -> Result<(), UpgradeError> {
        let step = UpgradeStep::ReplicaUpgrade;
        journal.waiting(step).await?;
        for replica in &volume.replicas {
            self.upgrade_volume_replica(replica, journal).await?;
        }
        journal.completed(step, "Replica upgrade was successful").await
    }

    async fn upgrade_volume_replica(&self, replica: &VolumeReplica, journal: &mut Journal) -> Result<(), UpgradeError> {
        let step = UpgradeStep::ReplicaUpgrade;
        let name = object_name(replica);
        let namespace = replica.metadata.namespace.as_deref().or(Some(self.config.namespace.as_str()));
        let gateway = self.clients.volume_replicas.as_ref();

        let current = journal
            .check(
                step,
                "failed to verify version details for cstor volume replica",
                wait_for_current_version(gateway, &name, namespace, self.config.poll_interval).await,
            )
            .await?;
        journal
            .check(
                step,
                "failed to patch cstor volume replica",
                request_version(gateway, &current, &self.config).await,
            )
            .await?;
        wait_for_reconcile(
            gateway,
            &name,
            namespace,
            &self.config.to_version,
            self.config.poll_interval,
            journal,
            step,
            "failed to get cstor volume replica",
        )
        .await
    }

    async fn cstor_target_upgrade(&self, volume: &CstorVolume, journal: &mut Journal) -> Result<(), UpgradeError> {
        let step = UpgradeStep::TargetUpgrade;
        journal.waiting(step).await?;

        journal
            .check(
                step,
                "failed to patch target deployment",
                self.patch_cstor_target(volume).await,
            )
            .await?;
        let service_selector = format!("{},{TARGET_SERVICE_LABEL}", volume.pv_selector);
        journal
            .check(
                step,
                "failed to patch target service",
                patch_service(&self.clients, &service_selector, &volume.namespace, &self.config).await,
            )
            .await?;

        let name = object_name(&volume.volume);
        let namespace = Some(volume.namespace.as_str());
        let gateway = self.clients.volumes.as_ref();
        let current = journal
            .check(
                step,
                "failed to verify version details for cstor volume",
                wait_for_current_version(gateway, &name, namespace, self.config.poll_interval).await,
            )
            .await?;
        journal
            .check(
                step,
                "failed to patch cstor volume",
                request_version(gateway, &current, &self.config).await,
            )
            .await?;
        wait_for_reconcile(
            gateway,
            &name,
            namespace,
            &self.config.to_version,
            self.config.poll_interval,
            journal,
            step,
            "failed to get cstor volume",
        )
        .await?;
        journal.completed(step, "Target upgrade was successful").await
    }

    async fn patch_cstor_target(&self, volume: &CstorVolume) -> Result<(), UpgradeError> {
        let target = &volume.target;
        let name = object_name(target);
        if !self.config.needs_upgrade(version_label(target)) {
            info!("target deployment {} already in {} version", name, self.config.to_version);
            return Ok(());
        }
        let patch = render_patch(
            CSTOR_TARGET_PATCH,
            &self.target_params(target, &volume.pv_name)?,
            PatchKind::StrategicMerge,
        )?;
        self.patcher.patch_deployment(&name, &volume.namespace, &patch).await?;
        info!("Target deployment {} patched", name);
        Ok(())
    }

    fn target_params(&self, target: &Deployment, pv_name: &str) -> Result<TemplateParams, UpgradeError> {
        let prefix = self.config.image_prefix.as_deref();
        let monitor = has_container(target, MONITOR_CONTAINER);
        Ok(TemplateParams {
            istgt_image: base_image(target, ISTGT_CONTAINER, prefix)?,
            volume_mgmt_image: base_image(target, VOLUME_MGMT_CONTAINER, prefix)?,
            m_exporter_image: if monitor {
                base_image(target, MONITOR_CONTAINER, prefix)?
            } else {
                String::new()
            },
            is_monitor_enabled: monitor,
            pv_name: label(&target.metadata, PERSISTENT_VOLUME_LABEL)
                .unwrap_or(pv_name)
                .to_string(),
            ..version_params(&self.config)
        })
    }
}
