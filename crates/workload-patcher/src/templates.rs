//! Patch templates for storage workloads

use serde::Serialize;

/// Values available to every patch template
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateParams {
    pub upgrade_version: String,
    pub current_version: String,
    pub image_tag: String,
    pub pool_image: String,
    pub pool_mgmt_image: String,
    pub m_exporter_image: String,
    pub base_dir: String,
    #[serde(rename = "SPCName")]
    pub spc_name: String,
    pub istgt_image: String,
    pub volume_mgmt_image: String,
    #[serde(rename = "PVName")]
    pub pv_name: String,
    pub is_monitor_enabled: bool,
    pub controller_image: String,
    pub replica_image: String,
    pub replica_container_name: String,
    pub controller_container_name: String,
}

/// Strategic merge patch for a jiva replica deployment
pub const JIVA_REPLICA_PATCH: &str = r#"{
  "metadata": {"labels": {"openebs.io/version": "{{.UpgradeVersion}}"}},
  "spec": {
    "template": {
      "metadata": {"labels": {"openebs.io/version": "{{.UpgradeVersion}}"}},
      "spec": {
        "containers": [
          {"name": "{{.ReplicaContainerName}}", "image": "{{.ReplicaImage}}:{{.ImageTag}}"}
        ]
      }
    }
  }
}"#;

/// Strategic merge patch for a jiva controller deployment; scales it back to one
pub const JIVA_TARGET_PATCH: &str = r#"{
  "metadata": {"labels": {"openebs.io/version": "{{.UpgradeVersion}}"}},
  "spec": {
    "replicas": 1,
    "template": {
      "metadata": {"labels": {"openebs.io/version": "{{.UpgradeVersion}}"}},
      "spec": {
        "containers": [
          {"name": "{{.ControllerContainerName}}", "image": "{{.ControllerImage}}:{{.ImageTag}}"}{{if .IsMonitorEnabled}},
          {"name": "maya-volume-exporter", "image": "{{.MExporterImage}}:{{.ImageTag}}"}{{end}}
        ]
      }
    }
  }
}"#;

/// Strategic merge patch for a cstor target deployment
pub const CSTOR_TARGET_PATCH: &str = r#"{
  "metadata": {"labels": {"openebs.io/version": "{{.UpgradeVersion}}"}},
  "spec": {
    "template": {
      "metadata": {"labels": {"openebs.io/version": "{{.UpgradeVersion}}"}},
      "spec": {
        "containers": [
          {"name": "cstor-istgt", "image": "{{.IstgtImage}}:{{.ImageTag}}"},{{if .IsMonitorEnabled}}
          {"name": "maya-volume-exporter", "image": "{{.MExporterImage}}:{{.ImageTag}}"},{{end}}
          {"name": "cstor-volume-mgmt", "image": "{{.VolumeMgmtImage}}:{{.ImageTag}}"}
        ]{{if lt .CurrentVersion "1.8.0"}},
        "volumes": [
          {"name": "tmp", "hostPath": {"path": "{{.BaseDir}}/shared-{{.PVName}}-target", "type": "DirectoryOrCreate"}}
        ]{{end}}
      }
    }
  }
}"#;

/// Strategic merge patch for a cstor pool deployment
pub const CSP_DEPLOY_PATCH: &str = r#"{
  "metadata": {"labels": {"openebs.io/version": "{{.UpgradeVersion}}"}},
  "spec": {
    "template": {
      "metadata": {"labels": {"openebs.io/version": "{{.UpgradeVersion}}"}},
      "spec": {
        "containers": [
          {
            "name": "cstor-pool",
            "image": "{{.PoolImage}}:{{.ImageTag}}"{{if lt .CurrentVersion "1.7.0"}},
            "livenessProbe": {
              "exec": {
                "command": ["/bin/sh", "-c", "timeout 120 zfs set io.openebs:livenesstimestamp=\"$(date +%s)\" cstor-$OPENEBS_IO_POOL_NAME"]
              },
              "failureThreshold": 3,
              "initialDelaySeconds": 300,
              "periodSeconds": 60,
              "timeoutSeconds": 150
            }{{end}}
          },
          {"name": "cstor-pool-mgmt", "image": "{{.PoolMgmtImage}}:{{.ImageTag}}"},
          {"name": "maya-exporter", "image": "{{.MExporterImage}}:{{.ImageTag}}"}
        ]{{if lt .CurrentVersion "1.8.0"}},
        "volumes": [
          {"name": "storagepath", "hostPath": {"path": "{{.BaseDir}}/cstor-pool/{{.SPCName}}", "type": "DirectoryOrCreate"}},
          {"name": "tmp", "hostPath": {"path": "{{.BaseDir}}/shared-{{.SPCName}}", "type": "DirectoryOrCreate"}}
        ]{{end}}
      }
    }
  }
}"#;

/// Version label patch for services
pub const SERVICE_VERSION_PATCH: &str = r#"{"metadata": {"labels": {"openebs.io/version": "{{.UpgradeVersion}}"}}}"#;

/// Merge patch requesting a version reconcile
pub const VERSION_DETAILS_PATCH: &str = r#"{"spec": {"versionDetails": {"desired": "{{.UpgradeVersion}}", "status": {"state": "ReconcilePending"}}}}"#;
