//! Storage pool claim upgrade
//!
//! Each pool of the claim is upgraded as its own `cstorPool` task, one at
//! a time. The claim itself is moved forward once every pool is done.

use crate::config::ResourceKind;
use crate::convergence::{request_version, wait_for_reconcile};
use crate::engine::Upgrader;
use crate::error::UpgradeError;
use crate::helpers::object_name;
use crate::journal::Journal;
use cluster_gateway::{ListOptions, is_healthy};
use crds::labels::{HOSTNAME_LABEL, STORAGE_POOL_CLAIM_LABEL, label};
use crds::{Pool, UpgradeStep};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Pools of one claim must sit on distinct nodes
fn check_distinct_nodes(pools: &[Pool], spc_name: &str) -> Result<(), UpgradeError> {
    let mut seen: HashMap<&str, String> = HashMap::new();
    for pool in pools {
        let Some(host) = label(&pool.metadata, HOSTNAME_LABEL).filter(|host| !host.is_empty()) else {
            continue;
        };
        let name = object_name(pool);
        if let Some(other) = seen.get(host) {
            return Err(UpgradeError::Precondition(format!(
                "pools {other} and {name} of {spc_name} are on the same node {host}"
            )));
        }
        seen.insert(host, name);
    }
    Ok(())
}

impl Upgrader {
    /// Upgrade every pool of `spc_name`, then the claim
    ///
    /// When a pool fails, `journal` is replaced by that pool's journal so the
    /// caller accounts the retry against the failing pool task.
    pub(crate) async fn upgrade_pool_claim(&self, spc_name: &str, journal: &mut Journal) -> Result<(), UpgradeError> {
        let pools = self
            .clients
            .pools
            .list(None, &ListOptions::labels(format!("{STORAGE_POOL_CLAIM_LABEL}={spc_name}")))
            .await?;
        if pools.is_empty() {
            return Err(UpgradeError::Precondition(format!(
                "no pools found for storagepoolclaim {spc_name}"
            )));
        }
        check_distinct_nodes(&pools, spc_name)?;

        let healthy = is_healthy();
        for pool in &pools {
            let name = object_name(pool);
            if !healthy(pool) {
                warn!("Pool {} of {} is in phase {:?}", name, spc_name, pool.phase());
            }
            info!("Upgrading cstor pool {} of {}", name, spc_name);

            let mut pool_journal = Journal::open(
                Arc::clone(&self.clients.upgrade_tasks),
                ResourceKind::CstorPool,
                &name,
                &self.config,
            )
            .await?;
            pool_journal.waiting(UpgradeStep::PreUpgrade).await?;
            match self.upgrade_cstor_pool(&name, &mut pool_journal).await {
                Ok(()) => pool_journal.mark_success().await?,
                Err(e) => {
                    *journal = pool_journal;
                    return Err(e);
                }
            }
        }

        let gateway = self.clients.pool_claims.as_ref();
        let claim = gateway.get(spc_name, None).await?;
        request_version(gateway, &claim, &self.config).await?;
        wait_for_reconcile(
            gateway,
            spc_name,
            None,
            &self.config.to_version,
            self.config.poll_interval,
            journal,
            UpgradeStep::PoolInstanceUpgrade,
            "failed to get storagepoolclaim",
        )
        .await?;
        info!("Upgrade successful for storagepoolclaim {}", spc_name);
        Ok(())
    }
}
