//! Replica CRD
//!
//! Declares a thin-provisioned volume dataset on the node's local pool.

use crate::version_details::{VersionDetails, Versioned};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "Replica",
    plural = "replicas",
    status = "ReplicaStatus",
    printcolumn = r#"{ "name":"volume", "type":"string", "description":"dataset name under the pool", "jsonPath":".spec.volumeName"}"#,
    printcolumn = r#"{ "name":"capacity", "type":"string", "description":"volume size", "jsonPath":".spec.capacity"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSpec {
    /// Dataset name under the local pool
    #[serde(default)]
    pub volume_name: String,

    /// Sized capacity string, e.g. "5G"
    #[serde(default)]
    pub capacity: String,

    /// Desired and observed version
    #[serde(default)]
    pub version_details: VersionDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaStatus {
    /// Current replica phase
    #[serde(default)]
    pub phase: ReplicaPhase,

    /// Pool the dataset was created on (resolved at reconcile time)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_name: Option<String>,

    /// Message describing the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last phase transition timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Replica lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum ReplicaPhase {
    #[default]
    #[serde(rename = "")]
    Empty,
    Pending,
    Healthy,
    Error,
    Invalid,
}

impl Versioned for Replica {
    fn version_details(&self) -> &VersionDetails {
        &self.spec.version_details
    }
}
