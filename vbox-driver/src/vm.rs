//! Handle to one registered machine.
//!
//! The handle holds no state of its own; every query goes to the hypervisor.

use serde::{Deserialize, Serialize};
use vbox_core::VmId;

use crate::driver::ExecuteOpts;
use crate::info::{self, VmState};
use crate::{Driver, DriverError};

/// Hardware settings taken from a machine's cloud properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmProps {
    /// Memory in MB.
    pub memory: u32,
    pub cpus: u32,
    /// `minimal` avoids guest CPU lockups.
    pub paravirtprovider: String,
    /// Start with a visible console window.
    pub gui: bool,
    /// Ephemeral disk size in MB.
    pub disk: u64,
}

impl Default for VmProps {
    fn default() -> Self {
        Self {
            memory: 512,
            cpus: 1,
            paravirtprovider: "minimal".to_owned(),
            gui: false,
            disk: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Vm {
    id: VmId,
    driver: Driver,
}

impl Vm {
    pub(crate) fn new(id: VmId, driver: Driver) -> Self {
        Self { id, driver }
    }

    #[must_use]
    pub fn id(&self) -> &VmId {
        &self.id
    }

    /// Powers the machine on.
    ///
    /// # Errors
    /// Returns [`DriverError::StartFailed`] unless the CLI confirms the start.
    pub async fn start(&self, gui: bool) -> Result<(), DriverError> {
        tracing::debug!(vm_id = %self.id, gui, "starting vm");
        let mode = if gui { "gui" } else { "headless" };
        let output = self
            .driver
            .execute_with(
                &["startvm", self.id.as_str(), "--type", mode],
                ExecuteOpts { ignore_non_zero_exit_code: true },
            )
            .await?;

        if !info::start_succeeded(&output) {
            return Err(DriverError::StartFailed { vm_id: self.id.clone(), output });
        }
        Ok(())
    }

    /// Current power state.
    ///
    /// # Errors
    /// Returns an error if the status query fails.
    pub async fn state(&self) -> Result<VmState, DriverError> {
        let output = self
            .driver
            .execute(&["showvminfo", self.id.as_str(), "--machinereadable"])
            .await?;
        Ok(info::parse_state(&output))
    }

    /// # Errors
    /// Returns an error if the status query fails.
    pub async fn is_running(&self) -> Result<bool, DriverError> {
        Ok(self.state().await? == VmState::Running)
    }

    /// # Errors
    /// Returns an error if the CLI rejects the rename.
    pub async fn set_name(&self, name: &str) -> Result<(), DriverError> {
        tracing::debug!(vm_id = %self.id, name, "renaming vm");
        self.driver.execute(&["modifyvm", self.id.as_str(), "--name", name]).await?;
        Ok(())
    }

    /// Applies memory, CPU and paravirtualization settings.
    ///
    /// # Errors
    /// Returns an error if the CLI rejects the settings.
    pub async fn set_props(&self, props: &VmProps) -> Result<(), DriverError> {
        tracing::debug!(vm_id = %self.id, memory = props.memory, cpus = props.cpus, "applying vm props");
        let memory = props.memory.to_string();
        let cpus = props.cpus.to_string();
        self.driver
            .execute(&[
                "modifyvm",
                self.id.as_str(),
                "--memory",
                &memory,
                "--cpus",
                &cpus,
                "--paravirtprovider",
                &props.paravirtprovider,
            ])
            .await?;
        Ok(())
    }

    /// Powers the machine off immediately.
    ///
    /// # Errors
    /// Returns an error if the CLI fails, including when the machine is off.
    pub async fn halt(&self) -> Result<(), DriverError> {
        tracing::debug!(vm_id = %self.id, "powering off vm");
        self.driver.execute(&["controlvm", self.id.as_str(), "poweroff"]).await?;
        Ok(())
    }

    /// Unregisters the machine and deletes its files.
    ///
    /// # Errors
    /// Returns an error if the CLI fails.
    pub async fn delete(&self) -> Result<(), DriverError> {
        tracing::debug!(vm_id = %self.id, "deleting vm");
        self.driver.execute(&["unregistervm", self.id.as_str(), "--delete"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn props_default_when_absent() {
        let props: VmProps = serde_json::from_value(serde_json::json!({})).expect("props");
        assert_eq!(props, VmProps::default());
        assert_eq!(props.memory, 512);
        assert_eq!(props.paravirtprovider, "minimal");
    }

    #[test]
    fn props_ignore_unrelated_cloud_properties() {
        let props: VmProps =
            serde_json::from_value(serde_json::json!({ "memory": 2048, "disk": 10000, "gui": true, "zone": "a" }))
                .expect("props");
        assert_eq!(props.memory, 2048);
        assert_eq!(props.disk, 10000);
        assert!(props.gui);
        assert_eq!(props.cpus, 1);
    }
}
