//! Linked clones from a prepared snapshot.

use uuid::Uuid;
use vbox_core::VmId;

use crate::vm::Vm;
use crate::{Driver, DriverError};

/// Snapshot every clone is linked to.
pub const PREPARED_SNAPSHOT_NAME: &str = "prepared-clone";

#[derive(Debug, Clone)]
pub struct VmCloner {
    driver: Driver,
}

impl VmCloner {
    pub(crate) fn new(driver: Driver) -> Self {
        Self { driver }
    }

    /// Takes the snapshot later clones are linked to.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be taken.
    pub async fn prepare(&self, vm: &Vm) -> Result<(), DriverError> {
        tracing::info!(vm_id = %vm.id(), "preparing vm for cloning");
        self.driver
            .execute(&["snapshot", vm.id().as_str(), "take", PREPARED_SNAPSHOT_NAME])
            .await?;
        Ok(())
    }

    /// Registers a new machine linked to the prepared snapshot of `vm`.
    ///
    /// # Errors
    /// Returns [`DriverError::CommandFailed`] if `vm` was never prepared.
    pub async fn clone_vm(&self, vm: &Vm) -> Result<Vm, DriverError> {
        let uuid = Uuid::new_v4().to_string();
        let name = format!("vm-{uuid}");
        tracing::info!(vm_id = %vm.id(), clone_id = %uuid, "cloning vm");

        self.driver
            .execute(&[
                "clonevm",
                vm.id().as_str(),
                "--snapshot",
                PREPARED_SNAPSHOT_NAME,
                "--options",
                "link",
                "--name",
                &name,
                "--uuid",
                &uuid,
                "--register",
            ])
            .await?;

        Ok(self.driver.vm(VmId::new(uuid)))
    }
}
