//! Virtual disk creation and SCSI attachment.

use vbox_core::PortDevice;

use crate::hot_plug::HotPlugger;
use crate::info;
use crate::vm::Vm;
use crate::{Driver, DriverError};

/// File name of the backing image inside a disk's registry entry.
pub const DISK_FILE_NAME: &str = "disk.vmdk";

const STORAGE_CONTROLLER: &str = "SCSI Controller";

/// Path of the backing image under `dir`.
#[must_use]
pub fn disk_image_path(dir: &str) -> String {
    format!("{}/{DISK_FILE_NAME}", dir.trim_end_matches('/'))
}

#[derive(Debug, Clone)]
pub struct DiskCreator {
    driver: Driver,
}

impl DiskCreator {
    pub(crate) fn new(driver: Driver) -> Self {
        Self { driver }
    }

    /// Creates a `size_mb` VMDK image inside `dir`.
    ///
    /// # Errors
    /// Returns an error if the CLI fails.
    pub async fn create(&self, dir: &str, size_mb: u64) -> Result<(), DriverError> {
        tracing::debug!(dir, size_mb, "creating disk image");
        let filename = disk_image_path(dir);
        let size = size_mb.to_string();
        self.driver
            .execute(&[
                "createhd",
                "--filename",
                &filename,
                "--size",
                &size,
                "--format",
                "VMDK",
                "--variant",
                "Standard",
            ])
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DiskAttacher {
    driver: Driver,
    vm: Vm,
    hot_plugger: HotPlugger,
}

impl DiskAttacher {
    pub(crate) fn new(driver: Driver, vm: Vm, hot_plugger: HotPlugger) -> Self {
        Self { driver, vm, hot_plugger }
    }

    /// Attaches the image in `dir` at the first free SCSI slot.
    ///
    /// # Errors
    /// Returns [`DriverError::NoFreePort`] without touching the machine if
    /// every slot is taken.
    pub async fn attach(&self, dir: &str) -> Result<PortDevice, DriverError> {
        let slot = self
            .free_slots()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::NoFreePort { vm_id: self.vm.id().clone() })?;

        tracing::debug!(vm_id = %self.vm.id(), dir, port = slot.port, device = slot.device, "attaching disk");
        let medium = disk_image_path(dir);
        let medium_args = ["--type", "hdd", "--medium", medium.as_str(), "--mtype", "normal"];
        self.hot_plugger
            .hot_plug(|| self.storage_attach(slot, &medium_args))
            .await?;
        Ok(slot)
    }

    /// Removes whatever medium sits at `slot`.
    ///
    /// # Errors
    /// Returns an error if the CLI fails.
    pub async fn detach(&self, slot: PortDevice) -> Result<(), DriverError> {
        tracing::debug!(vm_id = %self.vm.id(), port = slot.port, device = slot.device, "detaching disk");
        self.hot_plugger
            .hot_plug(|| self.storage_attach(slot, &["--type", "hdd", "--medium", "none"]))
            .await
    }

    async fn free_slots(&self) -> Result<Vec<PortDevice>, DriverError> {
        let output = self
            .driver
            .execute(&["showvminfo", self.vm.id().as_str(), "--machinereadable"])
            .await?;
        let slots = info::empty_scsi_slots(&output);
        tracing::debug!(vm_id = %self.vm.id(), free = slots.len(), "read scsi slots");
        Ok(slots)
    }

    async fn storage_attach(&self, slot: PortDevice, medium_args: &[&str]) -> Result<(), DriverError> {
        let port = slot.port.to_string();
        let device = slot.device.to_string();
        let mut args = vec![
            "storageattach",
            self.vm.id().as_str(),
            "--storagectl",
            STORAGE_CONTROLLER,
            "--port",
            &port,
            "--device",
            &device,
        ];
        args.extend_from_slice(medium_args);
        self.driver.execute(&args).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_path_ignores_trailing_slash() {
        assert_eq!(disk_image_path("/store/disks/disk-1"), "/store/disks/disk-1/disk.vmdk");
        assert_eq!(disk_image_path("/store/disks/disk-1/"), "/store/disks/disk-1/disk.vmdk");
    }
}
