//! Imports machine images.

use vbox_core::VmId;

use crate::info;
use crate::vm::Vm;
use crate::{Driver, DriverError};

#[derive(Debug, Clone)]
pub struct VmImporter {
    driver: Driver,
}

impl VmImporter {
    pub(crate) fn new(driver: Driver) -> Self {
        Self { driver }
    }

    /// Imports the appliance at `path` and resolves the new machine's id.
    ///
    /// The suggested name is read from the import output and looked up in
    /// `list vms`. The whole sequence is retried since import races with the
    /// hypervisor's own bookkeeping.
    ///
    /// # Errors
    /// Returns [`DriverError::ImportNameMissing`] or
    /// [`DriverError::ImportNotListed`] once retries are exhausted.
    pub async fn import(&self, path: &str) -> Result<Vm, DriverError> {
        let driver = &self.driver;
        driver
            .retrier()
            .retry_if(DriverError::is_import_retryable, move || async move {
                tracing::debug!(path, "importing appliance");
                let output = driver.execute(&["import", path]).await?;
                let name = info::suggested_vm_name(&output)
                    .ok_or_else(|| DriverError::ImportNameMissing { path: path.to_owned() })?
                    .to_owned();

                let listing = driver.execute(&["list", "vms"]).await?;
                match info::listed_vm_id(&listing, &name) {
                    Some(id) => Ok(driver.vm(VmId::new(id))),
                    None => Err(DriverError::ImportNotListed { path: path.to_owned(), name }),
                }
            })
            .await
    }
}
