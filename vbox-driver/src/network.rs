//! NIC configuration for powered-off and running machines.
//!
//! A powered-off machine is reconfigured with `modifyvm`. A running machine
//! cannot gain adapters, only switch the backend of an existing one, which
//! goes through `controlvm`. The power state is read once per call.

use vbox_core::{NetworkOption, NetworkType, VmId};

use crate::info;
use crate::vm::Vm;
use crate::{Driver, DriverError};

/// Adapters managed per machine.
pub const MAX_NICS: usize = 1;

/// Power state a configuration call dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    PoweredOff,
    Running,
}

impl PowerState {
    fn strategy(self) -> &'static dyn NicStrategy {
        match self {
            Self::PoweredOff => &PoweredOffStrategy,
            Self::Running => &RunningStrategy,
        }
    }
}

/// Builds CLI arguments that point NIC `nic` (1-based) at a network.
pub trait NicStrategy: Send + Sync {
    /// # Errors
    /// Returns [`DriverError::Core`] for an unknown network type.
    fn set_nic(&self, vm_id: &VmId, nic: usize, option: &NetworkOption) -> Result<Vec<String>, DriverError>;

    fn unset_nic(&self, vm_id: &VmId, nic: usize) -> Vec<String>;
}

#[derive(Debug)]
pub struct PoweredOffStrategy;

impl NicStrategy for PoweredOffStrategy {
    fn set_nic(&self, vm_id: &VmId, nic: usize, option: &NetworkOption) -> Result<Vec<String>, DriverError> {
        let name = option.cloud_name();
        let mut args = vec!["modifyvm".to_owned(), vm_id.to_string(), format!("--nic{nic}")];
        match option.cloud_type()? {
            NetworkType::Nat => args.push("nat".to_owned()),
            NetworkType::NatNetwork => {
                args.extend(["natnetwork".to_owned(), format!("--natnet{nic}"), name.to_owned()]);
            }
            NetworkType::HostOnly => {
                args.extend(["hostonly".to_owned(), format!("--hostonlyadapter{nic}"), name.to_owned()]);
            }
        }
        Ok(args)
    }

    fn unset_nic(&self, vm_id: &VmId, nic: usize) -> Vec<String> {
        vec!["modifyvm".to_owned(), vm_id.to_string(), format!("--nic{nic}"), "null".to_owned()]
    }
}

#[derive(Debug)]
pub struct RunningStrategy;

impl NicStrategy for RunningStrategy {
    fn set_nic(&self, vm_id: &VmId, nic: usize, option: &NetworkOption) -> Result<Vec<String>, DriverError> {
        let mut args = vec!["controlvm".to_owned(), vm_id.to_string(), format!("nic{nic}")];
        let network_type = option.cloud_type()?;
        args.push(network_type.as_str().to_owned());
        if network_type != NetworkType::Nat {
            args.push(option.cloud_name().to_owned());
        }
        Ok(args)
    }

    fn unset_nic(&self, vm_id: &VmId, nic: usize) -> Vec<String> {
        vec!["controlvm".to_owned(), vm_id.to_string(), format!("nic{nic}"), "null".to_owned()]
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfigurer {
    driver: Driver,
    vm: Vm,
}

impl NetworkConfigurer {
    pub(crate) fn new(driver: Driver, vm: Vm) -> Self {
        Self { driver, vm }
    }

    /// Points every managed NIC at its network option, or disconnects it.
    ///
    /// # Errors
    /// Returns [`DriverError::TooManyNics`] before running any command when
    /// more than [`MAX_NICS`] options are given.
    pub async fn configure(&self, options: &[NetworkOption]) -> Result<(), DriverError> {
        check_nic_count(options)?;
        let state = if self.vm.is_running().await? {
            PowerState::Running
        } else {
            PowerState::PoweredOff
        };
        self.configure_in(state, options).await
    }

    /// Like [`NetworkConfigurer::configure`] with an already known state.
    ///
    /// # Errors
    /// Returns an error for too many options, unknown types or CLI failures.
    pub async fn configure_in(&self, state: PowerState, options: &[NetworkOption]) -> Result<(), DriverError> {
        check_nic_count(options)?;
        let strategy = state.strategy();
        for nic in 1..=MAX_NICS {
            let args = match options.get(nic - 1) {
                Some(option) => {
                    tracing::debug!(
                        vm_id = %self.vm.id(),
                        nic,
                        network = option.cloud_name(),
                        state = ?state,
                        "configuring nic"
                    );
                    strategy.set_nic(self.vm.id(), nic, option)?
                }
                None => strategy.unset_nic(self.vm.id(), nic),
            };
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            self.driver.execute(&args).await?;
        }
        Ok(())
    }

    /// Copies the MAC address of each configured NIC onto its option.
    ///
    /// # Errors
    /// Returns [`DriverError::MissingMac`] if a configured NIC reports none.
    pub async fn add_macs(&self, options: &mut [NetworkOption]) -> Result<(), DriverError> {
        check_nic_count(options)?;
        let output = self
            .driver
            .execute(&["showvminfo", self.vm.id().as_str(), "--machinereadable"])
            .await?;
        let mut macs = info::parse_macs(&output);

        for (index, option) in options.iter_mut().enumerate() {
            let mac = macs.remove(&(index + 1)).ok_or_else(|| DriverError::MissingMac {
                vm_id: self.vm.id().clone(),
                network: option.name.clone(),
            })?;
            option.mac = Some(mac);
        }
        Ok(())
    }
}

fn check_nic_count(options: &[NetworkOption]) -> Result<(), DriverError> {
    if options.len() > MAX_NICS {
        return Err(DriverError::TooManyNics { requested: options.len(), max: MAX_NICS });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn option(cloud_properties: serde_json::Value) -> NetworkOption {
        let networks = json!({ "private": { "ip": "192.168.50.4", "cloud_properties": cloud_properties } });
        NetworkOption::parse_all(&networks).expect("networks").remove(0)
    }

    fn vm_id() -> VmId {
        VmId::new("0c5e7e1c-0000-4000-8000-000000000001")
    }

    #[test]
    fn powered_off_hostonly_uses_modifyvm() {
        let args = PoweredOffStrategy
            .set_nic(&vm_id(), 1, &option(json!({ "name": "vboxnet1" })))
            .expect("args");
        assert_eq!(args, ["modifyvm", vm_id().as_str(), "--nic1", "hostonly", "--hostonlyadapter1", "vboxnet1"]);
    }

    #[test]
    fn powered_off_natnetwork_names_the_network() {
        let args = PoweredOffStrategy
            .set_nic(&vm_id(), 1, &option(json!({ "type": "natnetwork", "name": "NatNetwork" })))
            .expect("args");
        assert_eq!(args[3..], ["natnetwork", "--natnet1", "NatNetwork"]);
    }

    #[test]
    fn running_uses_controlvm() {
        let args = RunningStrategy
            .set_nic(&vm_id(), 1, &option(json!({ "name": "vboxnet1" })))
            .expect("args");
        assert_eq!(args, ["controlvm", vm_id().as_str(), "nic1", "hostonly", "vboxnet1"]);

        let nat = RunningStrategy
            .set_nic(&vm_id(), 1, &option(json!({ "type": "nat" })))
            .expect("args");
        assert_eq!(nat[2..], ["nic1", "nat"]);
    }

    #[test]
    fn both_strategies_reject_unknown_types() {
        let bad = option(json!({ "type": "bridged" }));
        for strategy in [PowerState::PoweredOff.strategy(), PowerState::Running.strategy()] {
            assert!(matches!(strategy.set_nic(&vm_id(), 1, &bad), Err(DriverError::Core(_))));
        }
    }

    #[test]
    fn unset_disconnects_the_adapter() {
        assert_eq!(PoweredOffStrategy.unset_nic(&vm_id(), 1)[2..], ["--nic1", "null"]);
        assert_eq!(RunningStrategy.unset_nic(&vm_id(), 1)[2..], ["nic1", "null"]);
    }

    #[test]
    fn nic_cap_is_checked() {
        let networks = json!({ "a": {}, "b": {} });
        let options = NetworkOption::parse_all(&networks).expect("networks");
        assert!(matches!(
            check_nic_count(&options),
            Err(DriverError::TooManyNics { requested: 2, max: 1 })
        ));
        assert!(check_nic_count(&options[..1]).is_ok());
    }
}
