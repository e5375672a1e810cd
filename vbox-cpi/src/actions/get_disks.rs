use vbox_core::attachment::disk_id_from_key;
use vbox_core::{DiskAttachment, DiskType, VmId};

use super::ActionContext;
use crate::CpiError;

/// Attachment keys of the persistent disks attached to a machine.
#[derive(Debug)]
pub struct GetDisks<'a> {
    ctx: &'a ActionContext,
    vm_id: &'a VmId,
}

impl<'a> GetDisks<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, vm_id: &'a VmId) -> Self {
        Self { ctx, vm_id }
    }

    /// # Errors
    /// Returns an error if the machine is unknown or an attachment record
    /// cannot be read.
    pub async fn run(self) -> Result<Vec<String>, CpiError> {
        let vm = self.ctx.find_vm(self.vm_id).await?;
        tracing::info!(vm_id = %vm.id(), "listing disks from vm");

        let mut keys = Vec::new();
        for key in self.ctx.vms.list_artifacts(vm.id()).await? {
            if disk_id_from_key(&key).is_none() {
                continue;
            }
            let attachment = DiskAttachment::from_slice(&self.ctx.vms.get_artifact(vm.id(), &key).await?)?;
            if attachment.disk_type == DiskType::Persistent {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
