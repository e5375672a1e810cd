//! Lifecycle pipelines.
//!
//! Each action checks its inputs, then runs a linear sequence of hypervisor
//! and registry steps. A failing step aborts the rest; only [`CreateVm`]
//! undoes what it already did.

use serde_json::{Map, Value};
use vbox_core::{AgentEnv, VmId};
use vbox_driver::{Driver, Vm, VmProps};

use crate::registry::{DiskRegistry, StemcellRegistry, VmRegistry};
use crate::CpiError;

mod attach_disk;
mod create_disk;
mod create_stemcell;
mod create_vm;
mod delete_disk;
mod delete_stemcell;
mod delete_vm;
mod detach_disk;
mod get_disks;
mod has_disk;
mod has_vm;
mod reboot_vm;
mod set_vm_metadata;

pub use attach_disk::AttachDisk;
pub use create_disk::CreateDisk;
pub use create_stemcell::CreateStemcell;
pub use create_vm::CreateVm;
pub use delete_disk::DeleteDisk;
pub use delete_stemcell::DeleteStemcell;
pub use delete_vm::DeleteVm;
pub use detach_disk::DetachDisk;
pub use get_disks::GetDisks;
pub use has_disk::HasDisk;
pub use has_vm::HasVm;
pub use reboot_vm::RebootVm;
pub use set_vm_metadata::SetVmMetadata;

/// Agent environment document of a VM entry.
pub const ENV_JSON: &str = "env.json";
/// Disc image built from [`ENV_JSON`].
pub const ENV_ISO: &str = "env.iso";
pub const METADATA_JSON: &str = "metadata.json";
/// Stemcell artifact naming the template machine.
pub const VM_ID_ARTIFACT: &str = "vm-id";

/// Handles shared by every action.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub driver: Driver,
    pub stemcells: StemcellRegistry,
    pub vms: VmRegistry,
    pub disks: DiskRegistry,
    /// Merged into every new agent environment.
    pub agent_options: Map<String, Value>,
}

impl ActionContext {
    async fn find_vm(&self, id: &VmId) -> Result<Vm, CpiError> {
        tracing::info!(vm_id = %id, "checking vm");
        Ok(self.driver.vm_finder().find(id).await?)
    }

    async fn load_agent_env(&self, vm: &Vm) -> Result<AgentEnv, CpiError> {
        let contents = self.vms.get_artifact(vm.id(), ENV_JSON).await?;
        Ok(AgentEnv::from_json(&contents)?)
    }

    /// Stores `agent_env` and mounts a disc built from it.
    async fn deliver_agent_env(&self, vm: &Vm, agent_env: &AgentEnv) -> Result<(), CpiError> {
        tracing::info!(vm_id = %vm.id(), "mounting cdrom with agent env");
        self.vms.create_artifact(vm.id(), ENV_JSON, &agent_env.to_json()?).await?;
        self.vms.create_artifact(vm.id(), ENV_ISO, &agent_env.to_iso()?).await?;

        let iso_path = self.vms.artifact_path(vm.id(), ENV_ISO);
        self.driver.cdrom_mounter(vm).mount(&iso_path).await?;
        Ok(())
    }
}

/// Machine settings from cloud properties; `null` means all defaults.
///
/// # Errors
/// Returns [`CpiError::Validation`] if a known property has the wrong type.
pub fn vm_props(cloud_props: &Value) -> Result<VmProps, CpiError> {
    if cloud_props.is_null() {
        return Ok(VmProps::default());
    }
    serde_json::from_value(cloud_props.clone())
        .map_err(|e| CpiError::Validation { field: "cloud_properties", reason: e.to_string() })
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Context wired to an in-memory hypervisor and a temporary store.

    use std::sync::Arc;
    use std::time::Duration;

    use vbox_core::{AgentEnv, VmId};
    use vbox_driver::testing::{FakeHypervisor, FakeState};
    use vbox_driver::{Driver, Retrier, Runner, DEFAULT_BIN_PATH};

    use super::{ActionContext, ENV_JSON};
    use crate::registry::Registry;

    pub(crate) struct Harness {
        pub fake: Arc<FakeHypervisor>,
        pub ctx: ActionContext,
        pub dir: tempfile::TempDir,
    }

    pub(crate) fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let fake = Arc::new(FakeHypervisor::new());
        let runner: Arc<dyn Runner> = fake.clone();
        let store = dir.path().to_string_lossy().into_owned();
        let ctx = ActionContext {
            driver: Driver::new(runner.clone(), DEFAULT_BIN_PATH, Retrier::new(3, Duration::ZERO)),
            stemcells: Registry::new(format!("{store}/stemcells"), runner.clone()),
            vms: Registry::new(format!("{store}/vms"), runner.clone()),
            disks: Registry::new(format!("{store}/disks"), runner),
            agent_options: serde_json::Map::new(),
        };
        Harness { fake, ctx, dir }
    }

    /// Registers a fake machine with a minimal `env.json` on its entry.
    pub(crate) async fn vm_with_env(h: &Harness, state: FakeState) -> VmId {
        let id = VmId::new(h.fake.register("vm-1", state));
        let mut env = AgentEnv::new();
        env.vm_id = Some(id.clone());
        env.name = Some(id.to_string());
        env.agent_id = Some("agent-1".into());
        env.add_networks(&[]).expect("networks");
        env.add_empty_disks();
        h.ctx.vms.create_artifact(&id, ENV_JSON, &env.to_json().expect("json")).await.expect("env");
        id
    }
}
