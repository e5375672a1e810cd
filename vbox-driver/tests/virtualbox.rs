//! Integration test: primitives against a real VirtualBox installation.
//!
//! Requires: `VBoxManage` on `PATH` and an OVF appliance at the path in
//! `VBOX_TEST_OVF`.

use std::sync::Arc;

use vbox_driver::{Driver, LocalRunner, Retrier, TimedRunner, VmLookup, DEFAULT_BIN_PATH};

fn driver() -> Driver {
    let runner = Arc::new(TimedRunner::new(Arc::new(LocalRunner::new())));
    Driver::new(runner, DEFAULT_BIN_PATH, Retrier::default())
}

#[tokio::test]
#[ignore = "requires VBoxManage on PATH"]
async fn unknown_machine_is_not_found() {
    let lookup = driver()
        .vm_finder()
        .lookup(&vbox_core::VmId::new("00000000-0000-0000-0000-000000000000"))
        .await
        .expect("lookup");
    assert!(matches!(lookup, VmLookup::NotFound { .. }), "got {lookup:?}");
}

#[tokio::test]
#[ignore = "requires VBoxManage on PATH and VBOX_TEST_OVF"]
async fn import_prepare_clone_and_delete() {
    let ovf = std::env::var("VBOX_TEST_OVF").expect("VBOX_TEST_OVF");
    let driver = driver();

    let template = driver.vm_importer().import(&ovf).await.expect("import");
    driver.vm_cloner().prepare(&template).await.expect("prepare");

    let clone = driver.vm_cloner().clone_vm(&template).await.expect("clone");
    assert!(!clone.is_running().await.expect("state"));

    clone.delete().await.expect("delete clone");
    template.delete().await.expect("delete template");
}
