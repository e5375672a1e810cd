use vbox_core::{StemcellId, VmId};
use vbox_driver::VmLookup;

use super::{ActionContext, VM_ID_ARTIFACT};
use crate::CpiError;

/// Removes a stemcell together with its template machine.
#[derive(Debug)]
pub struct DeleteStemcell<'a> {
    ctx: &'a ActionContext,
    stemcell_id: &'a StemcellId,
}

impl<'a> DeleteStemcell<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, stemcell_id: &'a StemcellId) -> Self {
        Self { ctx, stemcell_id }
    }

    /// # Errors
    /// Returns [`CpiError::NotFound`] for an unknown stemcell.
    pub async fn run(self) -> Result<(), CpiError> {
        self.check_stemcell().await?;
        self.delete_vm().await?;
        self.delete_stemcell().await
    }

    async fn check_stemcell(&self) -> Result<(), CpiError> {
        tracing::info!(stemcell_id = %self.stemcell_id, "checking stemcell");
        if !self.ctx.stemcells.exists(self.stemcell_id).await? {
            return Err(CpiError::not_found("stemcell", self.stemcell_id));
        }
        Ok(())
    }

    async fn delete_vm(&self) -> Result<(), CpiError> {
        let contents = self.ctx.stemcells.get_artifact(self.stemcell_id, VM_ID_ARTIFACT).await?;
        let vm_id = VmId::new(String::from_utf8_lossy(&contents).trim());
        tracing::info!(stemcell_id = %self.stemcell_id, vm_id = %vm_id, "deleting stemcell vm");

        match self.ctx.driver.vm_finder().lookup(&vm_id).await? {
            VmLookup::Found(vm) => {
                if vm.is_running().await? {
                    vm.halt().await?;
                }
                vm.delete().await?;
            }
            VmLookup::NotFound { reason, .. } => {
                tracing::warn!(vm_id = %vm_id, reason = %reason, "stemcell vm already gone");
            }
        }
        Ok(())
    }

    async fn delete_stemcell(&self) -> Result<(), CpiError> {
        tracing::info!(stemcell_id = %self.stemcell_id, "deleting stemcell");
        self.ctx.stemcells.delete(self.stemcell_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::test_support::harness;
    use vbox_driver::testing::FakeState;

    #[tokio::test]
    async fn deletes_template_and_entry() {
        let h = harness();
        let uuid = h.fake.register("sc-template", FakeState::PoweredOff);
        let id = h.ctx.stemcells.create().await.expect("entry");
        h.ctx.stemcells.create_artifact(&id, VM_ID_ARTIFACT, uuid.as_bytes()).await.expect("vm-id");

        DeleteStemcell::new(&h.ctx, &id).run().await.expect("delete");
        assert!(h.fake.machine(&uuid).is_none());
        assert!(h.fake.commands_of("clonevm").is_empty());
        assert!(!h.ctx.stemcells.exists(&id).await.expect("exists"));
    }

    #[tokio::test]
    async fn missing_template_still_removes_entry() {
        let h = harness();
        let id = h.ctx.stemcells.create().await.expect("entry");
        h.ctx.stemcells.create_artifact(&id, VM_ID_ARTIFACT, b"gone").await.expect("vm-id");

        DeleteStemcell::new(&h.ctx, &id).run().await.expect("delete");
        assert!(!h.ctx.stemcells.exists(&id).await.expect("exists"));
    }

    #[tokio::test]
    async fn unknown_stemcell_fails() {
        let h = harness();
        let err = DeleteStemcell::new(&h.ctx, &StemcellId::new("sc-nope")).run().await;
        assert!(matches!(err, Err(CpiError::NotFound { kind: "stemcell", .. })), "got {err:?}");
    }
}
