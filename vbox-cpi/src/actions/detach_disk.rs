use vbox_core::attachment::attachment_key;
use vbox_core::{DiskAttachment, DiskId, VmId};
use vbox_driver::Vm;

use super::ActionContext;
use crate::CpiError;

/// Unplugs a disk using the slot recorded when it was attached.
#[derive(Debug)]
pub struct DetachDisk<'a> {
    ctx: &'a ActionContext,
    vm_id: &'a VmId,
    disk_id: &'a DiskId,
}

impl<'a> DetachDisk<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, vm_id: &'a VmId, disk_id: &'a DiskId) -> Self {
        Self { ctx, vm_id, disk_id }
    }

    /// # Errors
    /// Returns [`CpiError::NotFound`] if the disk is unknown or not attached
    /// to the machine, or the error of the first failing step.
    pub async fn run(self) -> Result<(), CpiError> {
        self.check_disk().await?;
        let vm = self.ctx.find_vm(self.vm_id).await?;
        let attachment = self.load_attachment(&vm).await?;

        tracing::info!(vm_id = %vm.id(), disk_id = %self.disk_id, slot = %attachment.port_and_device, "detaching disk");
        self.ctx.driver.disk_attacher(&vm).detach(attachment.port_and_device).await?;
        self.ctx.vms.delete_artifact(vm.id(), &attachment_key(self.disk_id)).await?;

        self.update_agent_env(&vm, &attachment).await
    }

    async fn check_disk(&self) -> Result<(), CpiError> {
        tracing::info!(disk_id = %self.disk_id, "checking disk");
        if !self.ctx.disks.exists(self.disk_id).await? {
            return Err(CpiError::not_found("disk", self.disk_id));
        }
        Ok(())
    }

    async fn load_attachment(&self, vm: &Vm) -> Result<DiskAttachment, CpiError> {
        let key = attachment_key(self.disk_id);
        if !self.ctx.vms.list_artifacts(vm.id()).await?.contains(&key) {
            return Err(CpiError::not_found("disk attachment", self.disk_id));
        }
        Ok(DiskAttachment::from_slice(&self.ctx.vms.get_artifact(vm.id(), &key).await?)?)
    }

    async fn update_agent_env(&self, vm: &Vm, attachment: &DiskAttachment) -> Result<(), CpiError> {
        tracing::info!(vm_id = %vm.id(), "updating agent env");
        let mut env = self.ctx.load_agent_env(vm).await?;
        env.remove_disk(attachment.disk_type, self.disk_id)?;
        self.ctx.deliver_agent_env(vm, &env).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::test_support::{harness, vm_with_env};
    use crate::actions::{AttachDisk, GetDisks, ENV_JSON};
    use serde_json::Value;
    use vbox_core::DiskType;
    use vbox_driver::testing::FakeState;

    #[tokio::test]
    async fn attach_then_detach_leaves_no_trace() {
        let h = harness();
        let vm_id = vm_with_env(&h, FakeState::PoweredOff).await;
        let disk_id = h.ctx.disks.create().await.expect("disk");

        AttachDisk::new(&h.ctx, &vm_id, &disk_id, DiskType::Persistent).run().await.expect("attach");
        assert_eq!(GetDisks::new(&h.ctx, &vm_id).run().await.expect("disks"), [attachment_key(&disk_id)]);

        DetachDisk::new(&h.ctx, &vm_id, &disk_id).run().await.expect("detach");
        assert!(GetDisks::new(&h.ctx, &vm_id).run().await.expect("disks").is_empty());
        let machine = h.fake.machine(vm_id.as_str()).expect("vm");
        assert!(machine.scsi.values().all(|medium| medium == "none"), "scsi: {:?}", machine.scsi);

        let env: Value = serde_json::from_slice(&h.ctx.vms.get_artifact(&vm_id, ENV_JSON).await.expect("env"))
            .expect("json");
        assert_eq!(env["disks"]["persistent"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn unattached_disk_is_not_found() {
        let h = harness();
        let vm_id = VmId::new(h.fake.register("vm-1", FakeState::PoweredOff));
        let disk_id = h.ctx.disks.create().await.expect("disk");
        h.ctx.vms.register(&vm_id).await.expect("entry");

        let err = DetachDisk::new(&h.ctx, &vm_id, &disk_id).run().await;
        assert!(matches!(err, Err(CpiError::NotFound { kind: "disk attachment", .. })), "got {err:?}");
    }

    #[tokio::test]
    async fn unknown_disk_fails_before_touching_the_vm() {
        let h = harness();
        let vm_id = vm_with_env(&h, FakeState::Running).await;
        h.fake.clear_commands();

        let err = DetachDisk::new(&h.ctx, &vm_id, &DiskId::new("disk-nope")).run().await;
        assert!(matches!(err, Err(CpiError::NotFound { kind: "disk", .. })), "got {err:?}");
        assert!(h.fake.commands().is_empty(), "commands: {:?}", h.fake.commands());
    }
}
