use vbox_core::VmId;

use super::ActionContext;
use crate::CpiError;

/// Power-cycles a machine: halt if running, then start.
#[derive(Debug)]
pub struct RebootVm<'a> {
    ctx: &'a ActionContext,
    vm_id: &'a VmId,
    gui: bool,
}

impl<'a> RebootVm<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, vm_id: &'a VmId, gui: bool) -> Self {
        Self { ctx, vm_id, gui }
    }

    /// # Errors
    /// Returns an error if the machine is unknown or fails to start.
    pub async fn run(self) -> Result<(), CpiError> {
        let vm = self.ctx.find_vm(self.vm_id).await?;

        tracing::info!(vm_id = %vm.id(), "powering off vm");
        if vm.is_running().await? {
            vm.halt().await?;
        }

        tracing::info!(vm_id = %vm.id(), gui = self.gui, "powering on vm");
        vm.start(self.gui).await?;
        Ok(())
    }
}
