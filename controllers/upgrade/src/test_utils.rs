//! Test fixtures for upgrade runs
//!
//! Builders for the workloads of each volume and pool kind plus a harness
//! whose mock cluster reacts to writes the way the cluster controllers
//! would: deployments roll out at once and versioned resources reconcile
//! to whatever version they are asked for.

use crate::config::UpgradeConfig;
use crate::engine::Upgrader;
use cluster_gateway::{ClusterClients, MockCluster, Verb};
use crds::labels::{
    CSTOR_POOL_LABEL, CSTOR_POOL_NAME_LABEL, HOSTNAME_LABEL, PERSISTENT_VOLUME_LABEL, STORAGE_POOL_CLAIM_LABEL,
    VERSION_LABEL,
};
use crds::{Pool, StoragePoolClaim, Volume, VolumeReplica};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolume, Pod, Service};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use workload_patcher::RolloutPolicy;

pub const NAMESPACE: &str = "openebs";
pub const FROM: &str = "1.3.0";
pub const TO: &str = "1.6.0";
pub const UPGRADE_POD: &str = "upgrade-pod";
pub const UPGRADE_JOB: &str = "upgrade-job";

/// Replica status response with `rw` replicas in RW mode and `wo` rebuilding
pub fn replica_status(rw: usize, wo: usize) -> String {
    let data: Vec<Value> = std::iter::repeat_n(json!({ "mode": "RW" }), rw)
        .chain(std::iter::repeat_n(json!({ "mode": "WO" }), wo))
        .collect();
    json!({ "data": data }).to_string()
}

fn labels(pairs: &[(&str, &str)]) -> Value {
    Value::Object(
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), json!(value)))
            .collect::<Map<String, Value>>(),
    )
}

fn object<K: DeserializeOwned>(value: Value) -> K {
    serde_json::from_value(value).unwrap()
}

/// Ready single-replica deployment running `containers` (name, image)
pub fn deployment(name: &str, namespace: &str, label_pairs: &[(&str, &str)], containers: &[(&str, &str)]) -> Deployment {
    let containers: Vec<Value> = containers
        .iter()
        .map(|(name, image)| json!({ "name": name, "image": image }))
        .collect();
    object(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": namespace, "labels": labels(label_pairs), "generation": 1 },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": { "containers": containers }
            }
        },
        "status": {
            "observedGeneration": 1,
            "replicas": 1,
            "updatedReplicas": 1,
            "readyReplicas": 1,
            "availableReplicas": 1
        }
    }))
}

pub fn service(name: &str, namespace: &str, label_pairs: &[(&str, &str)]) -> Service {
    object(json!({
        "metadata": { "name": name, "namespace": namespace, "labels": labels(label_pairs) },
        "spec": { "ports": [ { "port": 3260 } ] }
    }))
}

/// Pod whose first container carries `env`
pub fn pod(name: &str, namespace: &str, label_pairs: &[(&str, &str)], env: &[(&str, &str)]) -> Pod {
    let env: Vec<Value> = env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    object(json!({
        "metadata": { "name": name, "namespace": namespace, "labels": labels(label_pairs) },
        "spec": { "containers": [ { "name": "main", "image": "busybox", "env": env } ] }
    }))
}

pub fn job(name: &str, backoff_limit: i32) -> Job {
    object(json!({
        "metadata": { "name": name, "namespace": NAMESPACE },
        "spec": {
            "backoffLimit": backoff_limit,
            "template": { "spec": { "containers": [ { "name": "upgrade", "image": "upgrade" } ] } }
        }
    }))
}

/// Volume whose claim lives in `claim_namespace`
pub fn persistent_volume(name: &str, claim_namespace: &str) -> PersistentVolume {
    object(json!({
        "metadata": { "name": name },
        "spec": { "claimRef": { "name": format!("claim-{name}"), "namespace": claim_namespace } }
    }))
}

fn version_details(version: &str) -> Value {
    json!({ "desired": version, "status": { "current": version, "state": "Reconciled" } })
}

/// Volume resource of `pv` in the control plane namespace
pub fn volume(pv: &str, version: &str) -> Volume {
    object(json!({
        "apiVersion": "openebs.io/v1alpha1",
        "kind": "Volume",
        "metadata": {
            "name": pv,
            "namespace": NAMESPACE,
            "labels": labels(&[(PERSISTENT_VOLUME_LABEL, pv), (VERSION_LABEL, version)])
        },
        "spec": { "replicationFactor": 1, "consistencyFactor": 1, "versionDetails": version_details(version) }
    }))
}

pub fn volume_replica(name: &str, pv: &str, pool: &str, version: &str) -> VolumeReplica {
    object(json!({
        "apiVersion": "openebs.io/v1alpha1",
        "kind": "VolumeReplica",
        "metadata": {
            "name": name,
            "namespace": NAMESPACE,
            "labels": labels(&[
                (PERSISTENT_VOLUME_LABEL, pv),
                (CSTOR_POOL_NAME_LABEL, pool),
                (VERSION_LABEL, version)
            ])
        },
        "spec": { "versionDetails": version_details(version) },
        "status": { "phase": "Healthy" }
    }))
}

/// Healthy pool of claim `spc` on node `host`
pub fn pool(name: &str, spc: &str, host: &str, version: &str) -> Pool {
    object(json!({
        "apiVersion": "openebs.io/v1alpha1",
        "kind": "Pool",
        "metadata": {
            "name": name,
            "labels": labels(&[(STORAGE_POOL_CLAIM_LABEL, spc), (HOSTNAME_LABEL, host), (VERSION_LABEL, version)])
        },
        "spec": { "poolName": format!("cstor-{name}"), "disks": ["/dev/sdb"], "versionDetails": version_details(version) },
        "status": { "phase": "Healthy" }
    }))
}

pub fn pool_claim(name: &str, version: &str) -> StoragePoolClaim {
    object(json!({
        "apiVersion": "openebs.io/v1alpha1",
        "kind": "StoragePoolClaim",
        "metadata": { "name": name, "labels": labels(&[(VERSION_LABEL, version)]) },
        "spec": { "poolType": "striped", "versionDetails": version_details(version) }
    }))
}

/// Deployment status as a controller would report it once rolled out
fn roll_out(_: Verb, deployment: &mut Value) {
    let replicas = deployment["spec"]["replicas"].as_i64().unwrap_or(1);
    let generation = deployment["metadata"]["generation"].clone();
    deployment["status"] = json!({
        "observedGeneration": generation,
        "replicas": replicas,
        "updatedReplicas": replicas,
        "readyReplicas": replicas,
        "availableReplicas": replicas
    });
}

/// Version status as a reconciler would report it once caught up
fn reconcile(_: Verb, object: &mut Value) {
    let Some(desired) = object["spec"]["versionDetails"]["desired"]
        .as_str()
        .filter(|desired| !desired.is_empty())
        .map(str::to_string)
    else {
        return;
    };
    object["spec"]["versionDetails"]["status"]["current"] = json!(desired);
    object["spec"]["versionDetails"]["status"]["state"] = json!("Reconciled");
    object["metadata"]["labels"][VERSION_LABEL] = json!(desired);
}

/// Mock cluster with a control plane at the target version and an upgrade job
pub struct Harness {
    pub cluster: MockCluster,
}

impl Harness {
    pub fn new() -> Self {
        let cluster = MockCluster::new();
        cluster.on_write::<Deployment>(roll_out);
        cluster.on_write::<Volume>(reconcile);
        cluster.on_write::<VolumeReplica>(reconcile);
        cluster.on_write::<Pool>(reconcile);
        cluster.on_write::<StoragePoolClaim>(reconcile);

        cluster.insert(&pod(
            "maya-apiserver-0",
            NAMESPACE,
            &[("name", "maya-apiserver"), (VERSION_LABEL, TO)],
            &[("OPENEBS_IO_BASE_DIR", "/var/openebs-test")],
        ));
        let mut upgrade_pod = pod(UPGRADE_POD, NAMESPACE, &[("job-name", UPGRADE_JOB)], &[]);
        upgrade_pod.metadata.owner_references = Some(vec![object(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "name": UPGRADE_JOB,
            "uid": "job-uid"
        }))]);
        cluster.insert(&upgrade_pod);
        cluster.insert(&job(UPGRADE_JOB, 6));
        Self { cluster }
    }

    pub fn clients(&self) -> ClusterClients {
        ClusterClients::from_gateway(Arc::new(self.cluster.clone()))
    }

    /// Configuration for a labelled job with millisecond cadences
    pub fn config(&self) -> UpgradeConfig {
        let mut config = UpgradeConfig::new(FROM, TO, NAMESPACE);
        config.task_label_present = true;
        config.pod_name = Some(UPGRADE_POD.to_string());
        config.poll_interval = Duration::from_millis(1);
        config.verify_settle = Duration::ZERO;
        config.rollout = RolloutPolicy {
            interval: Duration::from_millis(1),
            attempts: 5,
        };
        config
    }

    pub fn upgrader(&self) -> Upgrader {
        Upgrader::new(self.clients(), self.config())
    }

    pub fn set_backoff_limit(&self, limit: i32) {
        self.cluster.insert(&job(UPGRADE_JOB, limit));
    }

    /// Jiva volume `pv` with three replicas at `version`, claimed from namespace "apps"
    pub fn seed_jiva_volume(&self, pv: &str, version: &str) {
        let jiva = format!("quay.io/openebs/jiva:{version}");
        let exporter = format!("quay.io/openebs/m-exporter:{version}");
        let controller_container = format!("{pv}-ctrl-con");
        let replica_container = format!("{pv}-rep-con");

        self.cluster.insert(&persistent_volume(pv, "apps"));
        self.cluster.insert(&deployment(
            &format!("{pv}-ctrl"),
            NAMESPACE,
            &[
                ("openebs.io/controller", "jiva-controller"),
                (PERSISTENT_VOLUME_LABEL, pv),
                (VERSION_LABEL, version),
            ],
            &[
                (controller_container.as_str(), jiva.as_str()),
                ("maya-volume-exporter", exporter.as_str()),
            ],
        ));
        for index in 0..3 {
            self.cluster.insert(&deployment(
                &format!("{pv}-rep-{index}"),
                NAMESPACE,
                &[
                    ("openebs.io/replica", "jiva-replica"),
                    (PERSISTENT_VOLUME_LABEL, pv),
                    (VERSION_LABEL, version),
                ],
                &[(replica_container.as_str(), jiva.as_str())],
            ));
        }
        self.cluster.insert(&service(
            &format!("{pv}-ctrl-svc"),
            NAMESPACE,
            &[
                ("openebs.io/controller-service", "jiva-controller-svc"),
                (PERSISTENT_VOLUME_LABEL, pv),
                (VERSION_LABEL, version),
            ],
        ));
        self.cluster.insert(&pod(
            &format!("{pv}-ctrl-pod"),
            NAMESPACE,
            &[("openebs.io/controller", "jiva-controller"), (PERSISTENT_VOLUME_LABEL, pv)],
            &[("REPLICATION_FACTOR", "3")],
        ));
        self.cluster.default_exec(Ok(replica_status(3, 0)));
    }

    /// cStor volume `pv` at `version` with one replica per `(pool, pool deployment version)`
    pub fn seed_cstor_volume(&self, pv: &str, version: &str, pools: &[(&str, &str)]) {
        let istgt = format!("quay.io/openebs/cstor-istgt:{version}");
        let exporter = format!("quay.io/openebs/m-exporter:{version}");
        let volume_mgmt = format!("quay.io/openebs/cstor-volume-mgmt:{version}");

        self.cluster.insert(&persistent_volume(pv, "apps"));
        self.cluster.insert(&deployment(
            &format!("{pv}-target"),
            NAMESPACE,
            &[
                (PERSISTENT_VOLUME_LABEL, pv),
                ("openebs.io/target", "cstor-target"),
                (VERSION_LABEL, version),
            ],
            &[
                ("cstor-istgt", istgt.as_str()),
                ("maya-volume-exporter", exporter.as_str()),
                ("cstor-volume-mgmt", volume_mgmt.as_str()),
            ],
        ));
        self.cluster.insert(&service(
            pv,
            NAMESPACE,
            &[
                (PERSISTENT_VOLUME_LABEL, pv),
                ("openebs.io/target-service", "cstor-target-svc"),
                (VERSION_LABEL, version),
            ],
        ));
        self.cluster.insert(&volume(pv, version));
        for &(pool, pool_version) in pools {
            let pool_image = format!("quay.io/openebs/cstor-pool:{pool_version}");
            self.cluster
                .insert(&volume_replica(&format!("{pv}-{pool}"), pv, pool, version));
            self.cluster.insert(&deployment(
                pool,
                NAMESPACE,
                &[(CSTOR_POOL_LABEL, pool), (VERSION_LABEL, pool_version)],
                &[("cstor-pool", pool_image.as_str())],
            ));
        }
    }

    /// Pool `name` of claim `spc` on `host` with its deployment, both at `version`
    pub fn seed_cstor_pool(&self, name: &str, spc: &str, host: &str, version: &str) {
        let pool_image = format!("quay.io/openebs/cstor-pool:{version}");
        let mgmt_image = format!("quay.io/openebs/cstor-pool-mgmt:{version}");
        let exporter = format!("quay.io/openebs/m-exporter:{version}");

        self.cluster.insert(&pool(name, spc, host, version));
        self.cluster.insert(&deployment(
            name,
            NAMESPACE,
            &[(CSTOR_POOL_LABEL, name), (STORAGE_POOL_CLAIM_LABEL, spc), (VERSION_LABEL, version)],
            &[
                ("cstor-pool", pool_image.as_str()),
                ("cstor-pool-mgmt", mgmt_image.as_str()),
                ("maya-exporter", exporter.as_str()),
            ],
        ));
    }
}
