use std::path::{Path, PathBuf};

use vbox_core::StemcellId;
use vbox_driver::{LocalRunner, Runner, Vm};

use super::{ActionContext, VM_ID_ARTIFACT};
use crate::CpiError;

const DESCRIPTOR_EXTENSION: &str = "ovf";

/// Imports a stemcell archive as a prepared template machine.
#[derive(Debug)]
pub struct CreateStemcell<'a> {
    ctx: &'a ActionContext,
    image_path: &'a Path,
}

impl<'a> CreateStemcell<'a> {
    #[must_use]
    pub fn new(ctx: &'a ActionContext, image_path: &'a Path) -> Self {
        Self { ctx, image_path }
    }

    /// # Errors
    /// Returns [`CpiError::CorruptImage`] if extraction fails,
    /// [`CpiError::MissingDescriptor`] if the archive has no `.ovf` file, or
    /// any import error.
    pub async fn run(self) -> Result<StemcellId, CpiError> {
        // Removed on drop, whichever step fails.
        let scratch = tempfile::tempdir()?;
        let dir = self.extract_stemcell(scratch.path()).await?;
        let descriptor = self.check_descriptor(&dir).await?;
        let stemcell_id = self.store_stemcell(&dir).await?;
        let vm = self.create_vm(&stemcell_id, &descriptor).await?;
        self.set_vm_name(&vm).await?;
        self.prepare_vm(&vm).await?;
        Ok(stemcell_id)
    }

    async fn extract_stemcell(&self, scratch: &Path) -> Result<PathBuf, CpiError> {
        let dir = scratch.join("image");
        tokio::fs::create_dir(&dir).await?;
        tracing::info!(dir = %dir.display(), "extracting stemcell");

        let dir_arg = dir.to_string_lossy();
        let image_arg = self.image_path.to_string_lossy();
        let output = LocalRunner::new()
            .execute("tar", &["-C", &dir_arg, "-xzf", &image_arg])
            .await?;
        if !output.success() {
            return Err(CpiError::CorruptImage { exit_code: output.exit_code, output: output.output });
        }
        Ok(dir)
    }

    async fn check_descriptor(&self, dir: &Path) -> Result<String, CpiError> {
        tracing::info!(dir = %dir.display(), "checking ovf file");
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if Path::new(name).extension().is_some_and(|ext| ext == DESCRIPTOR_EXTENSION) {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        names
            .into_iter()
            .next()
            .ok_or_else(|| CpiError::MissingDescriptor { dir: dir.display().to_string() })
    }

    async fn store_stemcell(&self, dir: &Path) -> Result<StemcellId, CpiError> {
        tracing::info!("storing stemcell");
        self.ctx.stemcells.create_from_dir(dir).await
    }

    async fn create_vm(&self, stemcell_id: &StemcellId, descriptor: &str) -> Result<Vm, CpiError> {
        tracing::info!(stemcell_id = %stemcell_id, "creating stemcell vm");
        let path = self.ctx.stemcells.artifact_path(stemcell_id, descriptor);
        let vm = self.ctx.driver.vm_importer().import(&path).await?;
        self.ctx
            .stemcells
            .create_artifact(stemcell_id, VM_ID_ARTIFACT, vm.id().as_str().as_bytes())
            .await?;
        Ok(vm)
    }

    async fn set_vm_name(&self, vm: &Vm) -> Result<(), CpiError> {
        tracing::info!(vm_id = %vm.id(), "setting name for stemcell vm");
        vm.set_name(&format!("sc-{}", vm.id())).await?;
        Ok(())
    }

    async fn prepare_vm(&self, vm: &Vm) -> Result<(), CpiError> {
        tracing::info!(vm_id = %vm.id(), "preparing stemcell vm");
        self.ctx.driver.vm_cloner().prepare(vm).await?;
        Ok(())
    }
}
