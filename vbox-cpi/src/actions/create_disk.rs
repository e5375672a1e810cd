use vbox_core::DiskId;

use super::ActionContext;
use crate::CpiError;

/// Allocates a disk entry and its backing image.
#[derive(Debug)]
pub struct CreateDisk<'a> {
    ctx: &'a ActionContext,
    size_mb: u64,
}

impl<'a> CreateDisk<'a> {
    /// # Errors
    /// Returns [`CpiError::Validation`] for a zero size.
    pub fn new(ctx: &'a ActionContext, size_mb: u64) -> Result<Self, CpiError> {
        if size_mb == 0 {
            return Err(CpiError::Validation { field: "size", reason: "must be > 0".into() });
        }
        Ok(Self { ctx, size_mb })
    }

    /// # Errors
    /// Returns an error if the entry or the image cannot be created.
    pub async fn run(self) -> Result<DiskId, CpiError> {
        tracing::info!(size_mb = self.size_mb, "creating disk");
        let disk_id = self.ctx.disks.create().await?;

        tracing::info!(disk_id = %disk_id, "allocating disk");
        self.ctx
            .driver
            .disk_creator()
            .create(&self.ctx.disks.path(&disk_id), self.size_mb)
            .await?;
        Ok(disk_id)
    }
}
