//! UpgradeTask CRD
//!
//! Durable journal of one in-flight upgrade. `UpgradeTaskSpec` names the
//! resource and the version jump; the status records the overall phase, retry count
//! and an ordered list of per-step entries.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "UpgradeTask",
    plural = "upgradetasks",
    shortname = "utask",
    namespaced,
    status = "UpgradeTaskStatus",
    printcolumn = r#"{ "name":"from", "type":"string", "jsonPath":".spec.fromVersion"}"#,
    printcolumn = r#"{ "name":"to", "type":"string", "jsonPath":".spec.toVersion"}"#,
    printcolumn = r#"{ "name":"phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTaskSpec {
    /// Version the resource is upgraded from
    pub from_version: String,

    /// Version the resource is upgraded to
    pub to_version: String,

    /// Task-wide options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<TaskOptions>,

    /// Resource being upgraded
    #[serde(flatten)]
    pub resource: ResourceSpec,

    /// Registry prefix for the new images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prefix: Option<String>,

    /// Tag for the new images (defaults to the target version)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
}

/// Task-wide options
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    /// Overall timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Exactly one of the fields is expected to be set
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jiva_volume: Option<VolumeTarget>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cstor_volume: Option<VolumeTarget>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cstor_pool: Option<PoolTarget>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_pool_claim: Option<PoolClaimTarget>,
}

/// Volume referenced by persistent volume name
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeTarget {
    #[serde(rename = "pvName")]
    pub pv_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ResourceOptions>,
}

/// Pool referenced by name
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolTarget {
    pub pool_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ResourceOptions>,
}

/// Pool claim referenced by name
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolClaimTarget {
    #[serde(rename = "spcName")]
    pub spc_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ResourceOptions>,
}

/// Per-resource options
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOptions {
    /// Steps whose failure should not fail the task
    #[serde(default)]
    pub ignore_steps_on_error: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTaskStatus {
    /// Overall phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<UpgradePhase>,

    /// When the task was first started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the task reached a terminal phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_time: Option<DateTime<Utc>>,

    /// Ordered step journal
    #[serde(default)]
    pub upgrade_detailed_statuses: Vec<UpgradeDetailedStatus>,

    /// Number of failed attempts so far
    #[serde(default)]
    pub retries: u32,
}

/// Overall upgrade phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum UpgradePhase {
    Started,
    Success,
    Error,
}

/// One journal entry
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeDetailedStatus {
    #[serde(default)]
    pub step: UpgradeStep,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, rename = "lastUpdatedAt", skip_serializing_if = "Option::is_none")]
    pub last_updated_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub phase: StepPhase,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub reason: String,
}

impl UpgradeDetailedStatus {
    /// Entry for `step` in `phase` with no message
    #[must_use]
    pub fn new(step: UpgradeStep, phase: StepPhase) -> Self {
        Self {
            step,
            phase,
            ..Default::default()
        }
    }
}

/// Upgrade step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeStep {
    #[default]
    #[serde(rename = "")]
    Unspecified,
    PreUpgrade,
    TargetUpgrade,
    ReplicaUpgrade,
    Verify,
    Rollback,
    PoolInstanceUpgrade,
}

/// Phase of a single step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum StepPhase {
    #[default]
    #[serde(rename = "")]
    Unspecified,
    Waiting,
    Errored,
    Completed,
}

impl std::fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UpgradeStep::Unspecified => "",
            UpgradeStep::PreUpgrade => "PRE_UPGRADE",
            UpgradeStep::TargetUpgrade => "TARGET_UPGRADE",
            UpgradeStep::ReplicaUpgrade => "REPLICA_UPGRADE",
            UpgradeStep::Verify => "VERIFY",
            UpgradeStep::Rollback => "ROLLBACK",
            UpgradeStep::PoolInstanceUpgrade => "POOL_INSTANCE_UPGRADE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_spec_is_flattened() {
        let spec = UpgradeTaskSpec {
            from_version: "1.3.0".to_string(),
            to_version: "1.6.0".to_string(),
            resource: ResourceSpec {
                jiva_volume: Some(VolumeTarget {
                    pv_name: "pvc-123".to_string(),
                    options: None,
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["jivaVolume"]["pvName"], "pvc-123");
        assert_eq!(value["fromVersion"], "1.3.0");
        assert!(value.get("resource").is_none());
    }

    #[test]
    fn test_step_wire_names() {
        assert_eq!(
            serde_json::to_value(UpgradeStep::PoolInstanceUpgrade).unwrap(),
            serde_json::json!("POOL_INSTANCE_UPGRADE")
        );
        assert_eq!(UpgradeStep::PreUpgrade.to_string(), "PRE_UPGRADE");
        assert_eq!(serde_json::to_value(StepPhase::Waiting).unwrap(), serde_json::json!("Waiting"));
    }

    #[test]
    fn test_detailed_status_last_updated_key() {
        let mut entry = UpgradeDetailedStatus::new(UpgradeStep::Verify, StepPhase::Waiting);
        entry.last_updated_time = Some(Utc::now());
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("lastUpdatedAt").is_some());
    }
}
