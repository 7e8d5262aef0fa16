//! Upgrade configuration
//!
//! Everything an upgrade run needs is built once at entry and passed down.

use crate::error::UpgradeError;
use semver::Version;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use workload_patcher::RolloutPolicy;

/// Base directory used when the control plane does not report one
pub const DEFAULT_BASE_DIR: &str = "/var/openebs";

/// Versions an upgrade may start from
const VALID_CURRENT_VERSIONS: &[&str] = &[
    "1.0.0", "1.1.0", "1.2.0", "1.3.0", "1.4.0", "1.5.0", "1.6.0", "1.7.0", "1.8.0", "1.9.0", "1.10.0", "1.11.0",
];

/// Versions an upgrade may move to
const VALID_DESIRED_VERSIONS: &[&str] = &[
    "1.1.0", "1.2.0", "1.3.0", "1.4.0", "1.5.0", "1.6.0", "1.7.0", "1.8.0", "1.9.0", "1.10.0", "1.11.0", "1.12.0",
];

/// `major.minor.patch` of `version`, `None` when it does not parse
fn release(version: &str) -> Option<String> {
    Version::parse(version.trim())
        .ok()
        .map(|v| format!("{}.{}.{}", v.major, v.minor, v.patch))
}

/// Whether `version` (ignoring any `-suffix`) can be upgraded from
pub fn is_current_version_valid(version: &str) -> bool {
    release(version).is_some_and(|release| VALID_CURRENT_VERSIONS.contains(&release.as_str()))
}

/// Whether `version` (ignoring any `-suffix`) can be upgraded to
pub fn is_desired_version_valid(version: &str) -> bool {
    release(version).is_some_and(|release| VALID_DESIRED_VERSIONS.contains(&release.as_str()))
}

/// Resource kinds the engine can upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    JivaVolume,
    CstorVolume,
    CstorPool,
    StoragePoolClaim,
}

impl ResourceKind {
    /// Name segment of the upgrade task, `upgrade-<slug>-<name>`
    pub fn task_slug(self) -> &'static str {
        match self {
            ResourceKind::JivaVolume => "jiva-volume",
            ResourceKind::CstorVolume => "cstor-volume",
            ResourceKind::CstorPool => "cstor-pool",
            ResourceKind::StoragePoolClaim => "cstor-spc",
        }
    }

    /// Name of the upgrade task for resource `name`
    pub fn task_name(self, name: &str) -> String {
        format!("upgrade-{}-{}", self.task_slug(), name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::JivaVolume => "jivaVolume",
            ResourceKind::CstorVolume => "cstorVolume",
            ResourceKind::CstorPool => "cstorPool",
            ResourceKind::StoragePoolClaim => "storagePoolClaim",
        })
    }
}

impl FromStr for ResourceKind {
    type Err = UpgradeError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "jivaVolume" => Ok(ResourceKind::JivaVolume),
            "cstorVolume" => Ok(ResourceKind::CstorVolume),
            "cstorPool" => Ok(ResourceKind::CstorPool),
            "storagePoolClaim" => Ok(ResourceKind::StoragePoolClaim),
            _ => Err(UpgradeError::InvalidKind),
        }
    }
}

/// Inputs of one upgrade run
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Version the resource runs today
    pub from_version: String,
    /// Version to move the resource to
    pub to_version: String,
    /// Namespace of the control plane
    pub namespace: String,
    /// Registry path replacing the repository of every image
    pub image_prefix: Option<String>,
    /// Tag for the new images; the target version when unset
    pub image_tag: Option<String>,
    /// Host directory for pool and target data; refreshed from the control plane
    pub base_dir: String,
    /// Journal write failures abort the run
    pub task_label_present: bool,
    /// Pod running this upgrade, used to find the owning job
    pub pod_name: Option<String>,
    /// Cadence of convergence polls
    pub poll_interval: Duration,
    /// Pause before replica sync verification
    pub verify_settle: Duration,
    /// Rollout polling budget for patched deployments
    pub rollout: RolloutPolicy,
}

impl UpgradeConfig {
    /// Configuration with production cadences
    pub fn new(from_version: impl Into<String>, to_version: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            from_version: from_version.into(),
            to_version: to_version.into(),
            namespace: namespace.into(),
            image_prefix: None,
            image_tag: None,
            base_dir: DEFAULT_BASE_DIR.to_string(),
            task_label_present: false,
            pod_name: None,
            poll_interval: Duration::from_secs(10),
            verify_settle: Duration::from_secs(10),
            rollout: RolloutPolicy::default(),
        }
    }

    /// Refuse versions outside the supported ranges
    pub fn validate(&self) -> Result<(), UpgradeError> {
        if !is_current_version_valid(&self.from_version) {
            return Err(UpgradeError::InvalidVersion(format!(
                "invalid current version {}",
                self.from_version
            )));
        }
        if !is_desired_version_valid(&self.to_version) {
            return Err(UpgradeError::InvalidVersion(format!(
                "invalid desired version {}",
                self.to_version
            )));
        }
        if self.namespace.is_empty() {
            return Err(UpgradeError::InvalidConfig("missing openebs namespace".to_string()));
        }
        Ok(())
    }

    /// Tag applied to every new image
    pub fn effective_image_tag(&self) -> String {
        self.image_tag
            .clone()
            .filter(|tag| !tag.is_empty())
            .unwrap_or_else(|| self.to_version.clone())
    }

    /// `"<what> version <v> is neither <from> nor <to>"` unless `version` is one of them
    pub fn check_version(&self, what: &str, version: &str) -> Result<(), UpgradeError> {
        if version == self.from_version || version == self.to_version {
            return Ok(());
        }
        Err(UpgradeError::Precondition(format!(
            "{} version {} is neither {} nor {}",
            what, version, self.from_version, self.to_version
        )))
    }

    /// Whether a resource at `version` still needs to be patched
    pub fn needs_upgrade(&self, version: &str) -> bool {
        version == self.from_version
    }
}
