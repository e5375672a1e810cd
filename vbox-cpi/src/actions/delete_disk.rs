use vbox_core::attachment::attachment_key;
use vbox_core::DiskId;

use super::ActionContext;
use crate::CpiError;

/// Removes a detached disk.
#[derive(Debug)]
pub struct DeleteDisk<'a> {
    ctx: &'a ActionContext,
    disk_id: &'a DiskId,
}

impl<'a> DeleteDisk<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, disk_id: &'a DiskId) -> Self {
        Self { ctx, disk_id }
    }

    /// # Errors
    /// Returns [`CpiError::NotFound`] for an unknown disk and
    /// [`CpiError::DiskAttached`] while any machine records it as attached.
    pub async fn run(self) -> Result<(), CpiError> {
        self.check_disk().await?;
        self.check_detached().await?;

        tracing::info!(disk_id = %self.disk_id, "deleting disk");
        self.ctx.disks.delete(self.disk_id).await
    }

    async fn check_disk(&self) -> Result<(), CpiError> {
        tracing::info!(disk_id = %self.disk_id, "checking disk");
        if !self.ctx.disks.exists(self.disk_id).await? {
            return Err(CpiError::not_found("disk", self.disk_id));
        }
        Ok(())
    }

    async fn check_detached(&self) -> Result<(), CpiError> {
        let key = attachment_key(self.disk_id);
        if let Some(vm_id) = self.ctx.vms.find_entries_with_artifact(&key).await?.into_iter().next() {
            return Err(CpiError::DiskAttached { disk_id: self.disk_id.clone(), vm_id });
        }
        Ok(())
    }
}
