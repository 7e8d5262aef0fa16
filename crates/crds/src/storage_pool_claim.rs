//! StoragePoolClaim CRD
//!
//! Groups the pools provisioned for one claim, one pool per node.

use crate::version_details::{VersionDetails, Versioned};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "StoragePoolClaim",
    plural = "storagepoolclaims",
    shortname = "spc",
    status = "StoragePoolClaimStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoolClaimSpec {
    /// Pool layout (e.g. "striped", "mirrored")
    #[serde(default)]
    pub pool_type: String,

    /// Maximum number of pools to provision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pools: Option<u32>,

    /// Desired and observed version
    #[serde(default)]
    pub version_details: VersionDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoolClaimStatus {
    /// Claim phase
    #[serde(default)]
    pub phase: String,
}

impl Versioned for StoragePoolClaim {
    fn version_details(&self) -> &VersionDetails {
        &self.spec.version_details
    }
}
