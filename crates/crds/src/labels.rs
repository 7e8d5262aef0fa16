//! Well-known label keys used to relate storage resources

/// Version of the component that owns a resource
pub const VERSION_LABEL: &str = "openebs.io/version";

/// Persistent volume a workload or replica belongs to
pub const PERSISTENT_VOLUME_LABEL: &str = "openebs.io/persistent-volume";

/// Storage pool claim a pool was provisioned from
pub const STORAGE_POOL_CLAIM_LABEL: &str = "openebs.io/storage-pool-claim";

/// Pool served by a pool deployment
pub const CSTOR_POOL_LABEL: &str = "openebs.io/cstor-pool";

/// Pool hosting a volume replica
pub const CSTOR_POOL_NAME_LABEL: &str = "cstorpool.openebs.io/name";

/// Node a pool is placed on
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Selector for the control plane API server pod
pub const CONTROL_PLANE_SELECTOR: &str = "name=maya-apiserver";

/// Read a label value from object metadata
pub fn label<'a>(
    meta: &'a k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
    key: &str,
) -> Option<&'a str> {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}
