//! Pause/resume workaround for storage changes on a running machine.
//!
//! The hypervisor cannot hot-plug devices. With silent reconfiguration
//! enabled, storage may be changed while the machine is paused, so a running
//! machine is paused around the change and resumed afterwards.

use std::future::Future;

use crate::vm::Vm;
use crate::{Driver, DriverError};

const SILENT_RECONFIGURE_KEY: &str = "VBoxInternal2/SilentReconfigureWhilePaused";

#[derive(Debug, Clone)]
pub struct HotPlugger {
    driver: Driver,
    vm: Vm,
}

impl HotPlugger {
    pub(crate) fn new(driver: Driver, vm: Vm) -> Self {
        Self { driver, vm }
    }

    /// Runs `op`, pausing the machine around it if it is running.
    ///
    /// Resume is attempted even when `op` fails; the error of `op` wins.
    ///
    /// # Errors
    /// Returns the error of `op`, or of the pause/resume commands.
    pub async fn hot_plug<T, F, Fut>(&self, op: F) -> Result<T, DriverError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let id = self.vm.id().as_str();
        self.driver
            .execute(&["setextradata", id, SILENT_RECONFIGURE_KEY, "1"])
            .await?;

        if !self.vm.is_running().await? {
            return op().await;
        }

        tracing::info!(vm_id = %id, "pausing vm for hot plug");
        self.driver.execute(&["controlvm", id, "pause"]).await?;

        let result = op().await;

        tracing::info!(vm_id = %id, "resuming vm after hot plug");
        let resumed = self.driver.execute(&["controlvm", id, "resume"]).await;
        match (result, resumed) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), resumed) => {
                if let Err(resume_err) = resumed {
                    tracing::warn!(vm_id = %id, error = %resume_err, "resume failed after hot plug error");
                }
                Err(e)
            }
        }
    }
}
