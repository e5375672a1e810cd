use vbox_core::attachment::attachment_key;
use vbox_core::{DiskAttachment, DiskId, DiskType, PortDevice, VmId};
use vbox_driver::Vm;

use super::ActionContext;
use crate::CpiError;

/// Plugs a disk into a machine and tells its agent where to find it.
#[derive(Debug)]
pub struct AttachDisk<'a> {
    ctx: &'a ActionContext,
    vm_id: &'a VmId,
    disk_id: &'a DiskId,
    disk_type: DiskType,
}

impl<'a> AttachDisk<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, vm_id: &'a VmId, disk_id: &'a DiskId, disk_type: DiskType) -> Self {
        Self { ctx, vm_id, disk_id, disk_type }
    }

    /// Returns the controller slot the disk landed in.
    ///
    /// # Errors
    /// Returns [`CpiError::NotFound`] for an unknown disk, or the error of
    /// the first failing step.
    pub async fn run(self) -> Result<PortDevice, CpiError> {
        self.check_disk().await?;
        let vm = self.ctx.find_vm(self.vm_id).await?;

        let slot = self.attach(&vm).await?;
        self.record_attachment(&vm, slot).await?;
        self.update_agent_env(&vm, slot).await?;
        Ok(slot)
    }

    async fn check_disk(&self) -> Result<(), CpiError> {
        tracing::info!(disk_id = %self.disk_id, "checking disk");
        if !self.ctx.disks.exists(self.disk_id).await? {
            return Err(CpiError::not_found("disk", self.disk_id));
        }
        Ok(())
    }

    async fn attach(&self, vm: &Vm) -> Result<PortDevice, CpiError> {
        tracing::info!(vm_id = %vm.id(), disk_id = %self.disk_id, disk_type = %self.disk_type, "attaching disk");
        let dir = self.ctx.disks.path(self.disk_id);
        Ok(self.ctx.driver.disk_attacher(vm).attach(&dir).await?)
    }

    async fn record_attachment(&self, vm: &Vm, slot: PortDevice) -> Result<(), CpiError> {
        let attachment = DiskAttachment { port_and_device: slot, disk_type: self.disk_type };
        self.ctx
            .vms
            .create_artifact(vm.id(), &attachment_key(self.disk_id), &attachment.to_vec()?)
            .await
    }

    async fn update_agent_env(&self, vm: &Vm, slot: PortDevice) -> Result<(), CpiError> {
        tracing::info!(vm_id = %vm.id(), slot = %slot, "updating agent env");
        let mut env = self.ctx.load_agent_env(vm).await?;
        env.add_disk(self.disk_type, self.disk_id, slot.port.to_string())?;
        self.ctx.deliver_agent_env(vm, &env).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::test_support::{harness, vm_with_env};
    use crate::actions::ENV_JSON;
    use serde_json::Value;
    use vbox_driver::testing::FakeState;

    #[tokio::test]
    async fn records_slot_and_updates_env() {
        let h = harness();
        let vm_id = vm_with_env(&h, FakeState::Running).await;
        let disk_id = h.ctx.disks.create().await.expect("disk");

        let slot = AttachDisk::new(&h.ctx, &vm_id, &disk_id, DiskType::Persistent)
            .run()
            .await
            .expect("attach");

        let record = h.ctx.vms.get_artifact(&vm_id, &attachment_key(&disk_id)).await.expect("record");
        let record = DiskAttachment::from_slice(&record).expect("decode");
        assert_eq!(record.port_and_device, slot);
        assert_eq!(record.disk_type, DiskType::Persistent);

        let env: Value = serde_json::from_slice(&h.ctx.vms.get_artifact(&vm_id, ENV_JSON).await.expect("env"))
            .expect("json");
        assert_eq!(env["disks"]["persistent"][disk_id.as_str()], slot.port.to_string());

        let machine = h.fake.machine(vm_id.as_str()).expect("vm");
        assert_eq!(machine.state, FakeState::Running, "resumed after hot plug");
        assert!(machine.dvd.ends_with("/env.iso"));
    }

    #[tokio::test]
    async fn unknown_disk_fails_before_touching_the_vm() {
        let h = harness();
        let vm_id = vm_with_env(&h, FakeState::PoweredOff).await;
        h.fake.clear_commands();

        let disk_id = DiskId::new("disk-nope");
        let err = AttachDisk::new(&h.ctx, &vm_id, &disk_id, DiskType::Persistent).run().await;
        assert!(matches!(err, Err(CpiError::NotFound { kind: "disk", .. })), "got {err:?}");
        assert!(h.fake.commands().is_empty(), "commands: {:?}", h.fake.commands());
    }
}
