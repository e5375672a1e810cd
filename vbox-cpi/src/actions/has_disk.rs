use vbox_core::DiskId;

use super::ActionContext;
use crate::CpiError;

/// Whether the disk has a registry entry.
#[derive(Debug)]
pub struct HasDisk<'a> {
    ctx: &'a ActionContext,
    disk_id: &'a DiskId,
}

impl<'a> HasDisk<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, disk_id: &'a DiskId) -> Self {
        Self { ctx, disk_id }
    }

    /// # Errors
    /// Returns an error only if the store cannot be queried.
    pub async fn run(self) -> Result<bool, CpiError> {
        tracing::info!(disk_id = %self.disk_id, "checking disk");
        self.ctx.disks.exists(self.disk_id).await
    }
}
