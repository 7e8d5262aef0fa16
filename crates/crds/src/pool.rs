//! Pool CRD
//!
//! Declares a node-local block pool managed through the external pool tool.
//! The replica controller on the node imports or creates the pool; the
//! upgrade engine moves its version forward.

use crate::version_details::{VersionDetails, Versioned};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "Pool",
    plural = "pools",
    shortname = "csp",
    status = "PoolStatus",
    printcolumn = r#"{ "name":"pool", "type":"string", "description":"name used by the pool tool", "jsonPath":".spec.poolName"}"#,
    printcolumn = r#"{ "name":"phase", "type":"string", "description":"pool phase", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{ "name":"version", "type":"string", "description":"running version", "jsonPath":".spec.versionDetails.status.current"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    /// Name the pool tool knows the pool by
    #[serde(default)]
    pub pool_name: String,

    /// Cache file used when importing or creating the pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<String>,

    /// Block device paths that make up the pool, in order
    #[serde(default)]
    pub disks: Vec<String>,

    /// Desired and observed version
    #[serde(default)]
    pub version_details: VersionDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    /// Current pool phase
    #[serde(default)]
    pub phase: PoolPhase,

    /// Message describing the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last phase transition timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Pool lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum PoolPhase {
    /// Not yet seen by a controller
    #[default]
    #[serde(rename = "")]
    Empty,
    Pending,
    Healthy,
    Offline,
    Degraded,
    Faulted,
    Removed,
    Unavailable,
    Error,
    DeletionFailed,
    Invalid,
    ErrorDuplicate,
}

impl PoolPhase {
    /// Whether a pool in this phase must have at least one disk
    #[must_use]
    pub fn requires_disks(self) -> bool {
        !matches!(self, PoolPhase::Empty | PoolPhase::Pending)
    }
}

impl Pool {
    /// Current phase, `Empty` when no status was written yet
    #[must_use]
    pub fn phase(&self) -> PoolPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}

impl Versioned for Pool {
    fn version_details(&self) -> &VersionDetails {
        &self.spec.version_details
    }
}
