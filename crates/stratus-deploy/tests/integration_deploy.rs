//! Integration tests for the deploy sequence.

mod common;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::fixtures::{free_addr, manifest, manifest_with_registry, request, stemcell};
use common::TestDeployment;
use stratus_deploy::{Call, DeployError, DeployOutcome};

fn vm(cid: &str) -> String {
    cid.to_owned()
}

#[tokio::test]
async fn first_deploy_runs_the_full_sequence() {
    let t = TestDeployment::new();

    let report = t.deployer.deploy(&request(manifest(1024))).await.unwrap();

    assert_eq!(report.outcome, DeployOutcome::Deployed);
    assert_eq!(
        t.log.calls(),
        vec![
            Call::CreateStemcell {
                image_path: "stemcell-1.0.tgz".to_owned()
            },
            Call::CreateVm {
                stemcell_cid: "stemcell-cid-1".to_owned()
            },
            Call::Ping,
            Call::CreateDisk {
                size: 1024,
                vm_cid: vm("vm-cid-2")
            },
            Call::AttachDisk {
                vm_cid: vm("vm-cid-2"),
                disk_cid: "disk-cid-3".to_owned()
            },
            Call::MountDisk {
                cid: "disk-cid-3".to_owned()
            },
            Call::Stop,
            Call::Apply,
            Call::Start,
            Call::GetState,
        ]
    );

    let disk = t.current_disk();
    assert_eq!(disk.size, 1024);
    assert_eq!(report.disk, Some(disk));
    assert_eq!(report.vm.unwrap().cid, "vm-cid-2");
    assert_eq!(
        t.agent.applied(),
        vec![serde_json::json!({"job": {"name": "cpi"}, "configuration_hash": "abc"})]
    );
    assert!(t.state().current_manifest_sha.is_some());
}

#[tokio::test]
async fn unchanged_redeploy_is_up_to_date() {
    let t = TestDeployment::new();
    t.deployer.deploy(&request(manifest(1024))).await.unwrap();
    t.log.clear();

    let report = t.deployer.deploy(&request(manifest(1024))).await.unwrap();

    assert_eq!(report.outcome, DeployOutcome::UpToDate);
    assert!(t.log.calls().is_empty());
    assert_eq!(report.disk.unwrap().size, 1024);
}

#[tokio::test]
async fn same_disk_size_reuses_vm_and_disk() {
    let t = TestDeployment::new();
    t.deployer.deploy(&request(manifest(1024))).await.unwrap();
    let disk = t.current_disk();
    t.log.clear();

    let mut changed = manifest(1024);
    changed.apply_spec = serde_json::json!({"job": {"name": "cpi"}, "configuration_hash": "def"});
    t.deployer.deploy(&request(changed)).await.unwrap();

    assert_eq!(
        t.log.methods(),
        vec!["has_vm", "ping", "stop", "apply", "start", "get_state"]
    );
    assert_eq!(t.current_disk(), disk);
}

#[tokio::test]
async fn larger_disk_is_migrated() {
    let t = TestDeployment::new();
    t.deployer.deploy(&request(manifest(1024))).await.unwrap();
    let old = t.current_disk();
    t.log.clear();

    t.deployer.deploy(&request(manifest(2048))).await.unwrap();

    let new = t.current_disk();
    assert_eq!(
        t.log.calls(),
        vec![
            Call::HasVm {
                cid: vm("vm-cid-2")
            },
            Call::Ping,
            Call::CreateDisk {
                size: 2048,
                vm_cid: vm("vm-cid-2")
            },
            Call::AttachDisk {
                vm_cid: vm("vm-cid-2"),
                disk_cid: new.cid.clone()
            },
            Call::MountDisk {
                cid: new.cid.clone()
            },
            Call::MigrateDisk,
            Call::DetachDisk {
                vm_cid: vm("vm-cid-2"),
                disk_cid: old.cid.clone()
            },
            Call::DeleteDisk {
                cid: old.cid.clone()
            },
            Call::Stop,
            Call::Apply,
            Call::Start,
            Call::GetState,
        ]
    );

    assert_eq!(new.size, 2048);
    assert_eq!(t.disks().len(), 1);
    assert_eq!(t.cloud.disks(), vec![new.cid]);
}

#[tokio::test]
async fn new_stemcell_recreates_the_vm_and_moves_the_disk() {
    let t = TestDeployment::new();
    t.deployer.deploy(&request(manifest(1024))).await.unwrap();
    let disk = t.current_disk();
    t.log.clear();

    let mut upgrade = request(manifest(1024));
    upgrade.stemcell = stemcell("2.0");
    let report = t.deployer.deploy(&upgrade).await.unwrap();

    assert_eq!(
        t.log.calls(),
        vec![
            Call::CreateStemcell {
                image_path: "stemcell-2.0.tgz".to_owned()
            },
            Call::HasVm {
                cid: vm("vm-cid-2")
            },
            Call::Ping,
            Call::Stop,
            Call::ListDisk,
            Call::UnmountDisk {
                cid: disk.cid.clone()
            },
            Call::DeleteVm {
                cid: vm("vm-cid-2")
            },
            Call::CreateVm {
                stemcell_cid: "stemcell-cid-4".to_owned()
            },
            Call::Ping,
            Call::AttachDisk {
                vm_cid: vm("vm-cid-5"),
                disk_cid: disk.cid.clone()
            },
            Call::MountDisk {
                cid: disk.cid.clone()
            },
            Call::Stop,
            Call::Apply,
            Call::Start,
            Call::GetState,
            Call::DeleteStemcell {
                cid: "stemcell-cid-1".to_owned()
            },
        ]
    );

    assert_eq!(report.stemcell.unwrap().version, "2.0");
    assert_eq!(t.cloud.stemcells(), vec!["stemcell-cid-4".to_owned()]);
    assert!(t.current_disk().is_attached_to("vm-cid-5"));
}

#[tokio::test]
async fn waits_for_jobs_to_report_running() {
    let t = TestDeployment::new();
    t.agent.script_states(["starting", "starting"]);

    t.deployer.deploy(&request(manifest(1024))).await.unwrap();

    let polls = t.log.methods().iter().filter(|m| **m == "get_state").count();
    assert_eq!(polls, 3);
}

#[tokio::test]
async fn jobs_that_never_run_time_out() {
    let t = TestDeployment::new();
    t.agent.set_steady_state("failing");

    let err = t.deployer.deploy(&request(manifest(1024))).await.unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(err.to_string().contains("failing"));
    assert!(t.state().current_manifest_sha.is_none());
}

#[tokio::test]
async fn invalid_manifest_fails_before_any_cloud_call() {
    let t = TestDeployment::new();
    let mut invalid = manifest(1024);
    invalid.mbus = String::new();

    let err = t.deployer.deploy(&request(invalid)).await.unwrap_err();

    assert!(matches!(err, DeployError::Config(_)));
    assert!(t.log.calls().is_empty());
}

#[tokio::test]
async fn taken_registry_port_fails_before_any_cloud_call() {
    let t = TestDeployment::new();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let err = t
        .deployer
        .deploy(&request(manifest_with_registry(1024, addr)))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Registry(_)));
    assert!(t.log.calls().is_empty());
}

/// PUT settings over a raw connection and return the status line.
fn put_settings(addr: SocketAddr) -> Option<String> {
    let mut stream = TcpStream::connect(addr).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;

    let body = "fake-registry-contents";
    write!(
        stream,
        "PUT /instances/agent-1/settings HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Authorization: Basic cmVnOnNlY3JldA==\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    )
    .ok()?;

    let mut response = String::new();
    stream.read_to_string(&mut response).ok()?;
    response.lines().next().map(ToOwned::to_owned)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registry_is_served_only_while_deploying() {
    let t = TestDeployment::new();
    let addr = free_addr();

    let seen = Arc::new(Mutex::new(None));
    let observed = Arc::clone(&seen);
    t.cloud.observe(move |call| {
        if matches!(call, Call::CreateVm { .. }) {
            *observed.lock().unwrap() = put_settings(addr);
        }
    });

    t.deployer
        .deploy(&request(manifest_with_registry(1024, addr)))
        .await
        .unwrap();

    let status = seen.lock().unwrap().clone();
    assert_eq!(status.as_deref(), Some("HTTP/1.1 201 Created"));
    assert!(TcpStream::connect(addr).is_err());
}
