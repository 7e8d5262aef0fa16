//! Version details shared by versioned storage resources
//!
//! Pools, volumes, volume replicas and pool claims carry a desired version
//! and a reconciler-owned status describing the version actually running.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired version plus the observed reconcile status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionDetails {
    /// Version the resource should be reconciled to
    #[serde(default)]
    pub desired: String,

    /// Whether the resource may be upgraded without an explicit request
    #[serde(default)]
    pub auto_upgrade: bool,

    /// Observed version status, written by the owning reconciler
    #[serde(default)]
    pub status: VersionStatus,
}

/// Observed side of [`VersionDetails`]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionStatus {
    /// Whether dependent resources have been upgraded
    #[serde(default)]
    pub dependents_upgraded: bool,

    /// Version currently running (empty until first reconciled)
    #[serde(default)]
    pub current: String,

    /// Reconcile state of the version
    #[serde(default)]
    pub state: VersionState,

    /// Human readable message from the last failed reconcile
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Reason for the last failed reconcile
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Last time the status was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Version reconcile state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum VersionState {
    /// Running version matches the desired version
    #[default]
    Reconciled,

    /// Reconciler is working on the version change
    ReconcileInProgress,

    /// A version change was requested and is not yet picked up
    ReconcilePending,
}

/// Access to the version details of a resource
pub trait Versioned {
    /// Version details of the resource
    fn version_details(&self) -> &VersionDetails;

    /// Observed running version, empty when not yet reconciled
    fn current_version(&self) -> &str {
        &self.version_details().status.current
    }
}
