use serde_json::Value;
use vbox_core::VmId;

use super::{ActionContext, METADATA_JSON};
use crate::CpiError;

/// Stores orchestrator tags on the machine's registry entry.
#[derive(Debug)]
pub struct SetVmMetadata<'a> {
    ctx: &'a ActionContext,
    vm_id: &'a VmId,
    metadata: &'a Value,
}

impl<'a> SetVmMetadata<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, vm_id: &'a VmId, metadata: &'a Value) -> Self {
        Self { ctx, vm_id, metadata }
    }

    /// # Errors
    /// Returns [`CpiError::Validation`] unless `metadata` is a JSON object.
    pub async fn run(self) -> Result<(), CpiError> {
        if !self.metadata.is_object() {
            return Err(CpiError::Validation { field: "metadata", reason: "must be an object".into() });
        }
        let vm = self.ctx.find_vm(self.vm_id).await?;

        tracing::info!(vm_id = %vm.id(), "setting metadata");
        let contents = serde_json::to_vec(self.metadata)?;
        self.ctx.vms.create_artifact(vm.id(), METADATA_JSON, &contents).await
    }
}
