//! Resolves machine ids to handles.

use vbox_core::VmId;

use crate::vm::Vm;
use crate::{Driver, DriverError};

/// Output marker of a status query for an unknown machine.
pub const MISSING_VM_MARKER: &str = "Could not find a registered machine";

/// Result of looking a machine up.
#[derive(Debug)]
pub enum VmLookup {
    Found(Vm),
    NotFound { vm_id: VmId, reason: String },
}

#[derive(Debug, Clone)]
pub struct VmFinder {
    driver: Driver,
}

impl VmFinder {
    pub(crate) fn new(driver: Driver) -> Self {
        Self { driver }
    }

    /// Queries the hypervisor for `id`.
    ///
    /// # Errors
    /// Returns any failure other than the machine being unknown.
    pub async fn lookup(&self, id: &VmId) -> Result<VmLookup, DriverError> {
        tracing::debug!(vm_id = %id, "looking up vm");
        match self.driver.execute(&["showvminfo", id.as_str()]).await {
            Ok(_) => Ok(VmLookup::Found(self.driver.vm(id.clone()))),
            Err(DriverError::CommandFailed { output, .. }) if output.contains(MISSING_VM_MARKER) => {
                Ok(VmLookup::NotFound { vm_id: id.clone(), reason: output.trim().to_owned() })
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`VmFinder::lookup`] but treats an unknown machine as an error.
    ///
    /// # Errors
    /// Returns [`DriverError::VmNotFound`] if the machine is unknown.
    pub async fn find(&self, id: &VmId) -> Result<Vm, DriverError> {
        match self.lookup(id).await? {
            VmLookup::Found(vm) => Ok(vm),
            VmLookup::NotFound { vm_id, reason } => Err(DriverError::VmNotFound { vm_id, reason }),
        }
    }
}
