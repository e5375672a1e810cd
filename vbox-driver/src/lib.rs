//! VirtualBox primitives driven through `VBoxManage`.
//!
//! Commands go through a pluggable [`Runner`] (local shell or SSH), are
//! retried while the hypervisor reports a machine as busy, and have their
//! exit codes and output classified into [`DriverError`]s. On top of that
//! sit the machine handle and the helpers for cloning, importing, disks,
//! the env disc and network adapters.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod cdrom;
pub mod cloner;
pub mod disk;
pub mod driver;
pub mod error;
pub mod finder;
pub mod hot_plug;
pub mod importer;
pub mod info;
pub mod network;
pub mod retrier;
pub mod runner;
pub mod vm;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cdrom::CdromMounter;
pub use cloner::{VmCloner, PREPARED_SNAPSHOT_NAME};
pub use disk::{disk_image_path, DiskAttacher, DiskCreator, DISK_FILE_NAME};
pub use driver::{Driver, ExecuteOpts, DEFAULT_BIN_PATH};
pub use error::DriverError;
pub use finder::{VmFinder, VmLookup};
pub use hot_plug::HotPlugger;
pub use importer::VmImporter;
pub use info::VmState;
pub use network::{NetworkConfigurer, PowerState, MAX_NICS};
pub use retrier::Retrier;
pub use runner::{CommandOutput, LocalRunner, RemoteRunner, Runner, TimedRunner};
pub use vm::{Vm, VmProps};

#[cfg(test)]
mod tests {
    //! Driver operations against the in-memory hypervisor.

    use std::sync::Arc;
    use std::time::Duration;

    use vbox_core::{NetworkOption, PortDevice, VmId};

    use super::*;
    use crate::testing::{FakeHypervisor, FakeState};

    fn setup() -> (Arc<FakeHypervisor>, Driver) {
        let fake = Arc::new(FakeHypervisor::new());
        let driver = Driver::new(fake.clone(), DEFAULT_BIN_PATH, Retrier::new(5, Duration::ZERO));
        (fake, driver)
    }

    fn hostonly() -> Vec<NetworkOption> {
        let networks = serde_json::json!({
            "private": { "ip": "192.168.50.4", "cloud_properties": { "name": "vboxnet1" } }
        });
        NetworkOption::parse_all(&networks).expect("networks")
    }

    #[tokio::test]
    async fn finder_distinguishes_missing_machines() {
        let (fake, driver) = setup();
        let uuid = fake.register("base", FakeState::PoweredOff);

        let found = driver.vm_finder().find(&VmId::new(uuid.clone())).await.expect("found");
        assert_eq!(found.id().as_str(), uuid);

        match driver.vm_finder().lookup(&VmId::new("nope")).await {
            Ok(VmLookup::NotFound { vm_id, reason }) => {
                assert_eq!(vm_id.as_str(), "nope");
                assert!(reason.contains("Could not find a registered machine"), "reason: {reason}");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert!(matches!(
            driver.vm_finder().find(&VmId::new("nope")).await,
            Err(DriverError::VmNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn vm_state_follows_start_and_halt() {
        let (fake, driver) = setup();
        let vm = driver.vm(VmId::new(fake.register("base", FakeState::PoweredOff)));

        assert_eq!(vm.state().await.expect("state"), VmState::PowerOff);
        vm.start(false).await.expect("start");
        assert!(vm.is_running().await.expect("running"));
        assert!(matches!(vm.start(false).await, Err(DriverError::StartFailed { .. })));

        vm.halt().await.expect("halt");
        assert!(!vm.is_running().await.expect("running"));
        assert!(fake.commands_of("startvm")[0].ends_with("--type headless"));
    }

    #[tokio::test]
    async fn props_and_name_are_applied() {
        let (fake, driver) = setup();
        let vm = driver.vm(VmId::new(fake.register("base", FakeState::PoweredOff)));

        vm.set_name("vm-renamed").await.expect("rename");
        vm.set_props(&VmProps { memory: 2048, cpus: 2, ..VmProps::default() }).await.expect("props");

        let machine = fake.machine(vm.id().as_str()).expect("registered");
        assert_eq!(machine.name, "vm-renamed");
        assert_eq!((machine.memory, machine.cpus), (2048, 2));
        assert_eq!(machine.paravirtprovider, "minimal");
    }

    #[tokio::test]
    async fn delete_unregisters() {
        let (fake, driver) = setup();
        let vm = driver.vm(VmId::new(fake.register("base", FakeState::PoweredOff)));
        vm.delete().await.expect("delete");
        assert!(fake.machines().is_empty());
    }

    #[tokio::test]
    async fn clone_requires_prepared_snapshot() {
        let (fake, driver) = setup();
        let template = driver.vm(VmId::new(fake.register("sc-template", FakeState::PoweredOff)));
        let cloner = driver.vm_cloner();

        assert!(matches!(cloner.clone_vm(&template).await, Err(DriverError::CommandFailed { .. })));

        cloner.prepare(&template).await.expect("prepare");
        let clone = cloner.clone_vm(&template).await.expect("clone");
        let machine = fake.machine(clone.id().as_str()).expect("clone registered");
        assert_eq!(machine.name, format!("vm-{}", clone.id()));
        assert!(fake.commands_of("clonevm")[1].contains("--options link"));
    }

    #[tokio::test]
    async fn import_resolves_listed_id() {
        let (fake, driver) = setup();
        let vm = driver.vm_importer().import("/store/stemcells/sc-1/image.ovf").await.expect("import");
        let machine = fake.machine(vm.id().as_str()).expect("imported");
        assert_eq!(machine.name, "image");
    }

    #[tokio::test]
    async fn busy_import_is_retried() {
        let (fake, driver) = setup();
        fake.not_ready("import", 1);
        let vm = driver.vm_importer().import("/store/image.ovf").await.expect("second attempt");
        assert!(fake.machine(vm.id().as_str()).is_some());
        assert_eq!(fake.commands_of("import").len(), 2);
    }

    #[tokio::test]
    async fn failed_import_is_not_repeated() {
        let (fake, driver) = setup();
        fake.fail_next("import", "Appliance read failed");
        let err = driver.vm_importer().import("/store/image.ovf").await;
        assert!(matches!(err, Err(DriverError::CommandFailed { .. })), "got {err:?}");
        assert_eq!(fake.commands_of("import").len(), 1);
        assert!(fake.machines().is_empty());
    }

    #[tokio::test]
    async fn busy_machine_is_retried_transparently() {
        let (fake, driver) = setup();
        let uuid = fake.register("base", FakeState::PoweredOff);
        fake.not_ready("showvminfo", 3);
        let vm = driver.vm(VmId::new(uuid));
        assert_eq!(vm.state().await.expect("state"), VmState::PowerOff);
        assert_eq!(fake.commands_of("showvminfo").len(), 4);
    }

    #[tokio::test]
    async fn attach_uses_first_free_slot_without_pausing_stopped_vm() {
        let (fake, driver) = setup();
        let vm = driver.vm(VmId::new(fake.register("base", FakeState::PoweredOff)));
        let attacher = driver.disk_attacher(&vm);

        let first = attacher.attach("/store/disks/disk-a").await.expect("attach");
        let second = attacher.attach("/store/disks/disk-b").await.expect("attach");
        assert_eq!(first, PortDevice::new(0, 0));
        assert_eq!(second, PortDevice::new(1, 0));
        assert!(fake.commands_of("controlvm").is_empty(), "stopped vm must not be paused");

        let machine = fake.machine(vm.id().as_str()).expect("vm");
        assert_eq!(machine.scsi[&(0, 0)], "/store/disks/disk-a/disk.vmdk");
        assert_eq!(machine.extradata["VBoxInternal2/SilentReconfigureWhilePaused"], "1");

        attacher.detach(first).await.expect("detach");
        assert_eq!(fake.machine(vm.id().as_str()).expect("vm").scsi[&(0, 0)], "none");
    }

    #[tokio::test]
    async fn attach_pauses_and_resumes_running_vm() {
        let (fake, driver) = setup();
        let vm = driver.vm(VmId::new(fake.register("base", FakeState::Running)));

        driver.disk_attacher(&vm).attach("/store/disks/disk-a").await.expect("attach");

        let control = fake.commands_of("controlvm");
        assert_eq!(control.len(), 2);
        assert!(control[0].ends_with("pause"));
        assert!(control[1].ends_with("resume"));
        assert_eq!(fake.machine(vm.id().as_str()).expect("vm").state, FakeState::Running);
    }

    #[tokio::test]
    async fn failed_hot_plug_still_resumes() {
        let (fake, driver) = setup();
        let vm = driver.vm(VmId::new(fake.register("base", FakeState::Running)));
        fake.fail_next("storageattach", "Could not find file for the medium");

        let err = driver.cdrom_mounter(&vm).mount("/store/vms/x/env.iso").await;
        assert!(matches!(err, Err(DriverError::CommandFailed { .. })));
        assert_eq!(fake.machine(vm.id().as_str()).expect("vm").state, FakeState::Running);
    }

    #[tokio::test]
    async fn attach_fails_when_slots_are_exhausted() {
        let (fake, driver) = setup();
        fake.set_scsi_slots(0);
        let vm = driver.vm(VmId::new(fake.register("full", FakeState::Running)));

        let err = driver.disk_attacher(&vm).attach("/store/disks/disk-a").await;
        assert!(matches!(err, Err(DriverError::NoFreePort { .. })));
        assert!(fake.commands_of("setextradata").is_empty());
        assert!(fake.commands_of("controlvm").is_empty());
    }

    #[tokio::test]
    async fn cdrom_mount_and_unmount() {
        let (fake, driver) = setup();
        let vm = driver.vm(VmId::new(fake.register("base", FakeState::PoweredOff)));
        let mounter = driver.cdrom_mounter(&vm);

        mounter.mount("/store/vms/x/env.iso").await.expect("mount");
        assert_eq!(fake.machine(vm.id().as_str()).expect("vm").dvd, "/store/vms/x/env.iso");
        mounter.unmount().await.expect("unmount");
        assert_eq!(fake.machine(vm.id().as_str()).expect("vm").dvd, "emptydrive");
    }

    #[tokio::test]
    async fn disk_creator_names_the_image() {
        let (fake, driver) = setup();
        driver.disk_creator().create("/store/disks/disk-a", 1024).await.expect("create");
        assert_eq!(fake.media(), ["/store/disks/disk-a/disk.vmdk"]);
        assert!(fake.commands_of("createhd")[0].contains("--size 1024 --format VMDK"));
    }

    #[tokio::test]
    async fn network_strategy_follows_power_state() {
        let (fake, driver) = setup();
        let off = driver.vm(VmId::new(fake.register("off", FakeState::PoweredOff)));
        let on = driver.vm(VmId::new(fake.register("on", FakeState::Running)));

        driver.network_configurer(&off).configure(&hostonly()).await.expect("off");
        driver.network_configurer(&on).configure(&hostonly()).await.expect("on");

        assert_eq!(fake.commands_of("modifyvm").len(), 1);
        assert_eq!(fake.commands_of("controlvm").len(), 1);
        for vm in [&off, &on] {
            let nic = &fake.machine(vm.id().as_str()).expect("vm").nics[&1];
            assert_eq!((nic.kind.as_str(), nic.target.as_deref()), ("hostonly", Some("vboxnet1")));
        }
    }

    #[tokio::test]
    async fn too_many_networks_fail_before_any_command() {
        let (fake, driver) = setup();
        let vm = driver.vm(VmId::new(fake.register("base", FakeState::PoweredOff)));
        fake.clear_commands();

        let networks = serde_json::json!({ "a": {}, "b": {} });
        let options = NetworkOption::parse_all(&networks).expect("networks");
        let err = driver.network_configurer(&vm).configure(&options).await;
        assert!(matches!(err, Err(DriverError::TooManyNics { requested: 2, max: 1 })));
        assert!(fake.commands().is_empty());
    }

    #[tokio::test]
    async fn macs_are_stamped_onto_options() {
        let (fake, driver) = setup();
        let vm = driver.vm(VmId::new(fake.register("base", FakeState::PoweredOff)));
        let mut options = hostonly();

        driver.network_configurer(&vm).add_macs(&mut options).await.expect("macs");
        let expected = fake.machine(vm.id().as_str()).expect("vm").nics[&1].mac.clone();
        assert_eq!(options[0].mac.as_deref(), Some(expected.as_str()));
        assert_eq!(options[0].formatted_mac().expect("mac").len(), 17);
    }
}
