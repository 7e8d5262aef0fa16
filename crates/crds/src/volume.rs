//! Volume CRD
//!
//! A family C volume: the iSCSI target endpoint plus the replica status
//! reported by the target.

use crate::version_details::{VersionDetails, Versioned};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "Volume",
    plural = "volumes",
    shortname = "cv",
    namespaced,
    status = "VolumeStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Number of replicas backing the volume
    #[serde(default)]
    pub replication_factor: u32,

    /// Replicas required for write quorum
    #[serde(default)]
    pub consistency_factor: u32,

    /// Target service IP
    #[serde(default, rename = "targetIP")]
    pub target_ip: String,

    /// Target service port
    #[serde(default)]
    pub target_port: String,

    /// Target portal ("ip:port")
    #[serde(default)]
    pub target_portal: String,

    /// iSCSI qualified name
    #[serde(default)]
    pub iqn: String,

    /// Volume capacity
    #[serde(default)]
    pub capacity: String,

    /// Desired and observed version
    #[serde(default)]
    pub version_details: VersionDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    /// Volume phase as reported by the target
    #[serde(default)]
    pub phase: String,

    /// Per-replica status entries
    #[serde(default)]
    pub replica_statuses: Vec<VolumeReplicaState>,

    /// Last phase transition timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// State of one replica as seen from the target
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicaState {
    #[serde(default, rename = "replicaId")]
    pub id: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub checkpointed_io_seq: String,
    #[serde(default)]
    pub inflight_read: String,
    #[serde(default)]
    pub inflight_write: String,
    #[serde(default)]
    pub inflight_sync: String,
    #[serde(default)]
    pub up_time: i64,
    #[serde(default)]
    pub quorum: String,
}

impl Versioned for Volume {
    fn version_details(&self) -> &VersionDetails {
        &self.spec.version_details
    }
}

impl VolumeStatus {
    /// One-line summary of the target view, for progress logs
    #[must_use]
    pub fn summary(&self) -> String {
        let replicas: Vec<String> = self
            .replica_statuses
            .iter()
            .map(|r| format!("{{ id {} mode {} quorum {} }}", r.id, r.mode, r.quorum))
            .collect();
        format!("phase {} replicas [{}]", self.phase, replicas.join(" "))
    }
}
