use vbox_core::attachment::disk_id_from_key;
use vbox_core::{DiskAttachment, DiskId, DiskType, VmId};
use vbox_driver::Vm;

use super::ActionContext;
use crate::CpiError;

/// Detaches persistent disks, then destroys the machine and its entry.
///
/// Ephemeral disks go down with the machine; their registry entries are
/// removed afterwards.
#[derive(Debug)]
pub struct DeleteVm<'a> {
    ctx: &'a ActionContext,
    vm_id: &'a VmId,
}

impl<'a> DeleteVm<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, vm_id: &'a VmId) -> Self {
        Self { ctx, vm_id }
    }

    /// # Errors
    /// Returns [`vbox_driver::DriverError::VmNotFound`] (wrapped) for an
    /// unknown machine, or the error of the first failing step.
    pub async fn run(self) -> Result<(), CpiError> {
        let vm = self.ctx.find_vm(self.vm_id).await?;
        let ephemeral = self.detach_persistent_disks(&vm).await?;
        self.delete_vm(&vm).await?;
        self.delete_ephemeral_disks(&ephemeral).await
    }

    async fn detach_persistent_disks(&self, vm: &Vm) -> Result<Vec<DiskId>, CpiError> {
        tracing::info!(vm_id = %vm.id(), "detaching disks from vm");
        let mut ephemeral = Vec::new();

        for key in self.ctx.vms.list_artifacts(vm.id()).await? {
            let Some(disk_id) = disk_id_from_key(&key) else {
                continue;
            };
            let attachment = DiskAttachment::from_slice(&self.ctx.vms.get_artifact(vm.id(), &key).await?)?;
            match attachment.disk_type {
                DiskType::Persistent => {
                    tracing::info!(vm_id = %vm.id(), disk_id = %disk_id, "detaching persistent disk");
                    self.ctx
                        .driver
                        .disk_attacher(vm)
                        .detach(attachment.port_and_device)
                        .await?;
                }
                DiskType::Ephemeral => ephemeral.push(disk_id),
            }
        }
        Ok(ephemeral)
    }

    async fn delete_vm(&self, vm: &Vm) -> Result<(), CpiError> {
        tracing::info!(vm_id = %vm.id(), "deleting vm");
        if vm.is_running().await? {
            vm.halt().await?;
        }
        vm.delete().await?;
        self.ctx.vms.delete(vm.id()).await
    }

    async fn delete_ephemeral_disks(&self, disks: &[DiskId]) -> Result<(), CpiError> {
        for disk_id in disks {
            tracing::info!(vm_id = %self.vm_id, disk_id = %disk_id, "deleting ephemeral disk entry");
            self.ctx.disks.delete(disk_id).await?;
        }
        Ok(())
    }
}
