//! Prints the CustomResourceDefinitions as a multi-document YAML stream.

use crds::{Pool, Replica, StoragePoolClaim, UpgradeTask, Volume, VolumeReplica};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let definitions = [
        Pool::crd(),
        Replica::crd(),
        Volume::crd(),
        VolumeReplica::crd(),
        StoragePoolClaim::crd(),
        UpgradeTask::crd(),
    ];
    for crd in &definitions {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
