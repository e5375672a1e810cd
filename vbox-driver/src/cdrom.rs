//! Agent environment disc drive.

use crate::hot_plug::HotPlugger;
use crate::vm::Vm;
use crate::{Driver, DriverError};

const STORAGE_CONTROLLER: &str = "IDE Controller";
const PORT: &str = "1";
const DEVICE: &str = "0";

#[derive(Debug, Clone)]
pub struct CdromMounter {
    driver: Driver,
    vm: Vm,
    hot_plugger: HotPlugger,
}

impl CdromMounter {
    pub(crate) fn new(driver: Driver, vm: Vm, hot_plugger: HotPlugger) -> Self {
        Self { driver, vm, hot_plugger }
    }

    /// Inserts the disc image at `iso_path`.
    ///
    /// # Errors
    /// Returns an error if the CLI fails.
    pub async fn mount(&self, iso_path: &str) -> Result<(), DriverError> {
        tracing::debug!(vm_id = %self.vm.id(), "mounting env disc");
        self.hot_plugger.hot_plug(|| self.set_medium(iso_path)).await
    }

    /// Ejects the disc, keeping the drive.
    ///
    /// # Errors
    /// Returns an error if the CLI fails.
    pub async fn unmount(&self) -> Result<(), DriverError> {
        tracing::debug!(vm_id = %self.vm.id(), "unmounting env disc");
        // `none` would remove the drive itself.
        self.hot_plugger.hot_plug(|| self.set_medium("emptydrive")).await
    }

    async fn set_medium(&self, medium: &str) -> Result<(), DriverError> {
        self.driver
            .execute(&[
                "storageattach",
                self.vm.id().as_str(),
                "--storagectl",
                STORAGE_CONTROLLER,
                "--port",
                PORT,
                "--device",
                DEVICE,
                "--type",
                "dvddrive",
                "--medium",
                medium,
            ])
            .await?;
        Ok(())
    }
}
