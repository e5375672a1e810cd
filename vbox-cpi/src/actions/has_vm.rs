use vbox_core::VmId;
use vbox_driver::VmLookup;

use super::ActionContext;
use crate::CpiError;

/// Whether the hypervisor knows the machine.
#[derive(Debug)]
pub struct HasVm<'a> {
    ctx: &'a ActionContext,
    vm_id: &'a VmId,
}

impl<'a> HasVm<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, vm_id: &'a VmId) -> Self {
        Self { ctx, vm_id }
    }

    /// # Errors
    /// Returns failures other than the machine being unknown.
    pub async fn run(self) -> Result<bool, CpiError> {
        tracing::info!(vm_id = %self.vm_id, "checking vm");
        match self.ctx.driver.vm_finder().lookup(self.vm_id).await? {
            VmLookup::Found(_) => Ok(true),
            VmLookup::NotFound { .. } => Ok(false),
        }
    }
}
