//! VolumeReplica CRD
//!
//! One replica of a family C volume, placed on exactly one pool. The pool
//! is referenced by label, never by owner reference.

use crate::version_details::{VersionDetails, Versioned};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "VolumeReplica",
    plural = "volumereplicas",
    shortname = "cvr",
    namespaced,
    status = "VolumeReplicaStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicaSpec {
    /// Target IP the replica connects to
    #[serde(default, rename = "targetIP")]
    pub target_ip: String,

    /// Replica capacity
    #[serde(default)]
    pub capacity: String,

    /// Number of zvol worker threads
    #[serde(default)]
    pub zvol_workers: String,

    /// Identifier stable across recreations
    #[serde(default, rename = "replicaid")]
    pub replica_id: String,

    /// Desired and observed version
    #[serde(default)]
    pub version_details: VersionDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicaStatus {
    /// Replica phase
    #[serde(default)]
    pub phase: String,

    /// Last phase transition timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Message for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Versioned for VolumeReplica {
    fn version_details(&self) -> &VersionDetails {
        &self.spec.version_details
    }
}
