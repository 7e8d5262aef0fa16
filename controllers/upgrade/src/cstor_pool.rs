//! cStor pool upgrade

use crate::convergence::{request_version, wait_for_current_version, wait_for_reconcile};
use crate::engine::Upgrader;
use crate::error::UpgradeError;
use crate::helpers::{get_deployment, object_name, render_patch, require_version, version_label, version_params};
use crate::journal::Journal;
use cluster_gateway::PatchKind;
use crds::labels::{CSTOR_POOL_LABEL, STORAGE_POOL_CLAIM_LABEL, label};
use crds::{Pool, UpgradeStep};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::info;
use workload_patcher::templates::CSP_DEPLOY_PATCH;
use workload_patcher::{TemplateParams, base_image};

#[derive(Debug)]
struct CstorPool {
    name: String,
    deployment: Deployment,
}

impl Upgrader {
    pub(crate) async fn upgrade_cstor_pool(&self, name: &str, journal: &mut Journal) -> Result<(), UpgradeError> {
        let pool = self.cstor_pool_pre_upgrade(name, journal).await?;
        self.pool_instance_upgrade(&pool, journal).await?;
        info!("Upgrade successful for cstor pool {}", name);
        Ok(())
    }

    async fn cstor_pool_pre_upgrade(&self, name: &str, journal: &mut Journal) -> Result<CstorPool, UpgradeError> {
        let step = UpgradeStep::PreUpgrade;
        journal
            .check(step, "failed to verify cstor pool", self.verify_pool(name).await)
            .await?;
        let deployment = journal
            .check(
                step,
                "failed to verify cstor pool deployment",
                self.pool_deployment(name).await,
            )
            .await?;
        journal.completed(step, "Pre-upgrade steps were successful").await?;
        Ok(CstorPool {
            name: name.to_string(),
            deployment,
        })
    }

    async fn verify_pool(&self, name: &str) -> Result<Pool, UpgradeError> {
        let pool = self
            .clients
            .pools
            .get(name, None)
            .await
            .map_err(|e| UpgradeError::Precondition(format!("failed to get csp {name}: {e}")))?;
        self.config
            .check_version(&format!("cstor pool {name}"), version_label(&pool))?;
        Ok(pool)
    }

    async fn pool_deployment(&self, name: &str) -> Result<Deployment, UpgradeError> {
        let deployment = get_deployment(
            &self.clients,
            &format!("{CSTOR_POOL_LABEL}={name}"),
            &self.config.namespace,
        )
        .await?;
        let version = require_version(&deployment)?;
        self.config.check_version(
            &format!("cstor pool deployment {}", object_name(&deployment)),
            &version,
        )?;
        Ok(deployment)
    }

    async fn pool_instance_upgrade(&self, pool: &CstorPool, journal: &mut Journal) -> Result<(), UpgradeError> {
        let step = UpgradeStep::PoolInstanceUpgrade;
        journal.waiting(step).await?;
        journal
            .check(
                step,
                "failed to patch cstor pool deployment",
                self.patch_pool_deployment(&pool.deployment).await,
            )
            .await?;

        let gateway = self.clients.pools.as_ref();
        let current = journal
            .check(
                step,
                "failed to verify versiondetails for cstor pool",
                wait_for_current_version(gateway, &pool.name, None, self.config.poll_interval).await,
            )
            .await?;
        journal
            .check(
                step,
                "failed to patch cstor pool",
                request_version(gateway, &current, &self.config).await,
            )
            .await?;
        wait_for_reconcile(
            gateway,
            &pool.name,
            None,
            &self.config.to_version,
            self.config.poll_interval,
            journal,
            step,
            "failed to get cstor pool",
        )
        .await?;
        journal.completed(step, "Pool instance upgrade was successful").await
    }

    async fn patch_pool_deployment(&self, deployment: &Deployment) -> Result<(), UpgradeError> {
        let name = object_name(deployment);
        if !self.config.needs_upgrade(version_label(deployment)) {
            info!("cstor pool deployment {} already in {} version", name, self.config.to_version);
            return Ok(());
        }
        let prefix = self.config.image_prefix.as_deref();
        let params = TemplateParams {
            pool_image: base_image(deployment, "cstor-pool", prefix)?,
            pool_mgmt_image: base_image(deployment, "cstor-pool-mgmt", prefix)?,
            m_exporter_image: base_image(deployment, "maya-exporter", prefix)?,
            spc_name: label(&deployment.metadata, STORAGE_POOL_CLAIM_LABEL)
                .unwrap_or_default()
                .to_string(),
            ..version_params(&self.config)
        };
        let patch = render_patch(CSP_DEPLOY_PATCH, &params, PatchKind::StrategicMerge)?;
        let namespace = deployment.metadata.namespace.as_deref().unwrap_or(&self.config.namespace);
        self.patcher.patch_deployment(&name, namespace, &patch).await?;
        info!("cstor pool deployment {} patched", name);
        Ok(())
    }
}
