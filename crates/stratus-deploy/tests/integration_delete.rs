//! Integration tests for tearing a deployment down.

mod common;

use common::fixtures::{manifest, request};
use common::TestDeployment;
use stratus_deploy::{Call, DeployOutcome};

#[tokio::test]
async fn live_vm_is_shut_down_through_its_agent() {
    let t = TestDeployment::new();
    t.deployer.deploy(&request(manifest(1024))).await.unwrap();
    let disk = t.current_disk();
    t.log.clear();

    t.deployer.delete(&manifest(1024)).await.unwrap();

    assert_eq!(
        t.log.calls(),
        vec![
            Call::HasVm {
                cid: "vm-cid-2".to_owned()
            },
            Call::Ping,
            Call::Stop,
            Call::ListDisk,
            Call::UnmountDisk {
                cid: disk.cid.clone()
            },
            Call::DeleteVm {
                cid: "vm-cid-2".to_owned()
            },
            Call::DeleteDisk {
                cid: disk.cid.clone()
            },
            Call::DeleteStemcell {
                cid: "stemcell-cid-1".to_owned()
            },
        ]
    );

    let state = t.state();
    assert!(state.current_vm.is_none());
    assert!(state.disks.is_empty());
    assert!(state.stemcells.is_empty());
    assert!(state.current_manifest_sha.is_none());
    assert!(t.cloud.vms().is_empty());
    assert!(t.cloud.disks().is_empty());
}

#[tokio::test]
async fn vanished_vm_is_deleted_without_contacting_the_agent() {
    let t = TestDeployment::new();
    t.deployer.deploy(&request(manifest(1024))).await.unwrap();
    t.cloud.remove_vm("vm-cid-2");
    t.log.clear();

    t.deployer.delete(&manifest(1024)).await.unwrap();

    assert!(t.log.calls().iter().all(|c| !c.is_agent_call()));
    assert_eq!(
        t.log.methods(),
        vec!["has_vm", "delete_vm", "delete_disk", "delete_stemcell"]
    );
}

#[tokio::test]
async fn vanished_vm_is_replaced_on_redeploy() {
    let t = TestDeployment::new();
    t.deployer.deploy(&request(manifest(1024))).await.unwrap();
    let old = t.current_disk();
    t.cloud.remove_vm("vm-cid-2");
    t.log.clear();

    t.deployer.deploy(&request(manifest(2048))).await.unwrap();

    let methods = t.log.methods();
    let agent_calls_before_delete = t
        .log
        .calls()
        .iter()
        .take_while(|c| !matches!(c, Call::DeleteVm { .. }))
        .filter(|c| c.is_agent_call())
        .count();
    assert_eq!(agent_calls_before_delete, 0);
    assert_eq!(
        methods,
        vec![
            "has_vm",
            "delete_vm",
            "create_vm",
            "ping",
            "attach_disk",
            "mount_disk",
            "create_disk",
            "attach_disk",
            "mount_disk",
            "migrate_disk",
            "detach_disk",
            "delete_disk",
            "stop",
            "apply",
            "start",
            "get_state",
        ]
    );

    let new = t.current_disk();
    assert_ne!(new.cid, old.cid);
    assert_eq!(new.size, 2048);
}

#[tokio::test]
async fn deploy_after_delete_starts_from_scratch() {
    let t = TestDeployment::new();
    t.deployer.deploy(&request(manifest(1024))).await.unwrap();
    t.deployer.delete(&manifest(1024)).await.unwrap();
    t.log.clear();

    let report = t.deployer.deploy(&request(manifest(1024))).await.unwrap();

    assert_eq!(report.outcome, DeployOutcome::Deployed);
    assert_eq!(
        t.log.methods(),
        vec![
            "create_stemcell",
            "create_vm",
            "ping",
            "create_disk",
            "attach_disk",
            "mount_disk",
            "stop",
            "apply",
            "start",
            "get_state",
        ]
    );
}
