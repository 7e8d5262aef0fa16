//! Upgrade
//!
//! One-shot job moving a storage resource from one release to the next:
//! - jivaVolume: replicas, then controller, then a replica sync check
//! - cstorVolume: replicas, then target
//! - cstorPool: pool deployment and pool object
//! - cstorSPC: every pool of a storage pool claim, then the claim
//!
//! Progress is journaled on the resource's `UpgradeTask`.

mod config;
mod convergence;
mod cstor_pool;
mod cstor_volume;
mod engine;
mod engine_test;
mod error;
mod helpers;
mod jiva;
mod journal;
mod pool_claim;
#[cfg(test)]
mod test_utils;

use crate::config::{ResourceKind, UpgradeConfig};
use crate::engine::{TaskRequest, Upgrader};
use anyhow::Context;
use clap::{Parser, Subcommand};
use cluster_gateway::{ClusterClients, KubeGateway};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "upgrade", about = "Upgrades OpenEBS storage resources to a new version")]
struct Cli {
    /// Version the resource currently runs
    #[arg(long, global = true, default_value = "")]
    from_version: String,

    /// Version to upgrade to
    #[arg(long, global = true, default_value = "")]
    to_version: String,

    /// Namespace of the control plane
    #[arg(long, global = true, env = "OPENEBS_NAMESPACE", default_value = "openebs")]
    openebs_namespace: String,

    /// Registry path replacing the repository of every new image
    #[arg(long, global = true)]
    to_version_image_prefix: Option<String>,

    /// Tag of the new images, defaults to --to-version
    #[arg(long, global = true)]
    to_version_image_tag: Option<String>,

    /// Path to a kubeconfig; in-cluster or local config is inferred when unset
    #[arg(long, global = true, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Set when the job was created for an UpgradeTask
    #[arg(long, global = true, env = "UPGRADE_TASK_LABEL", hide = true)]
    upgrade_task_label: Option<String>,

    #[arg(long, global = true, env = "POD_NAME", hide = true)]
    pod_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upgrade a jiva volume
    JivaVolume {
        #[arg(long)]
        pv_name: String,
    },
    /// Upgrade a cStor volume
    CstorVolume {
        #[arg(long)]
        pv_name: String,
    },
    /// Upgrade a single cStor pool
    CstorPool {
        #[arg(long)]
        csp_name: String,
    },
    /// Upgrade every pool of a storage pool claim
    #[command(name = "cstor-spc")]
    CstorSpc {
        #[arg(long)]
        spc_name: String,
    },
    /// Run the upgrade described by an UpgradeTask
    Resource {
        #[arg(long)]
        upgrade_task: String,
    },
}

impl Cli {
    fn config(&self) -> UpgradeConfig {
        let mut config = UpgradeConfig::new(&self.from_version, &self.to_version, &self.openebs_namespace);
        config.image_prefix = self.to_version_image_prefix.clone();
        config.image_tag = self.to_version_image_tag.clone();
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let gateway = Arc::new(KubeGateway::new(cli.kubeconfig.clone()));
    let clients = ClusterClients::from_gateway(gateway);

    let (kind, name, mut config) = match &cli.command {
        Command::JivaVolume { pv_name } => (ResourceKind::JivaVolume, pv_name.clone(), cli.config()),
        Command::CstorVolume { pv_name } => (ResourceKind::CstorVolume, pv_name.clone(), cli.config()),
        Command::CstorPool { csp_name } => (ResourceKind::CstorPool, csp_name.clone(), cli.config()),
        Command::CstorSpc { spc_name } => (ResourceKind::StoragePoolClaim, spc_name.clone(), cli.config()),
        Command::Resource { upgrade_task } => {
            let task = clients
                .upgrade_tasks
                .get(upgrade_task, Some(&cli.openebs_namespace))
                .await
                .with_context(|| format!("failed to get upgradetask {}/{}", cli.openebs_namespace, upgrade_task))?;
            let request = TaskRequest::from_task(&task, &cli.openebs_namespace)?;
            (request.kind, request.name, request.config)
        }
    };
    config.task_label_present = cli.upgrade_task_label.is_some();
    config.pod_name = cli.pod_name.clone();

    info!("Configuration:");
    info!("  Resource: {} {}", kind, name);
    info!("  From version: {}", config.from_version);
    info!("  To version: {}", config.to_version);
    info!("  Namespace: {}", config.namespace);
    if let Some(prefix) = config.image_prefix.as_deref() {
        info!("  Image prefix: {}", prefix);
    }
    info!("  Image tag: {}", config.effective_image_tag());
    info!(
        "  Kubeconfig: {}",
        cli.kubeconfig
            .as_deref()
            .map_or_else(|| "inferred".to_string(), |p| p.display().to_string())
    );

    Upgrader::new(clients, config).exec(&kind.to_string(), &name).await?;
    Ok(())
}
