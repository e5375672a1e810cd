//! The lifecycle facade.
//!
//! [`Cpi`] wires the selected transport, the hypervisor driver and the three
//! registries together, then exposes one method per lifecycle call.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use vbox_core::{DiskId, DiskType, StemcellId, VmId};
use vbox_driver::{Driver, LocalRunner, RemoteRunner, Runner, TimedRunner};

use crate::actions::{
    self, ActionContext, AttachDisk, CreateDisk, CreateStemcell, CreateVm, DeleteDisk, DeleteStemcell,
    DeleteVm, DetachDisk, GetDisks, HasDisk, HasVm, RebootVm, SetVmMetadata,
};
use crate::registry::{resolve_dir, Registry};
use crate::{CpiError, CpiOptions};

/// Lifecycle driver bound to one hypervisor host and store.
#[derive(Debug, Clone)]
pub struct Cpi {
    ctx: ActionContext,
}

impl Cpi {
    /// Builds the transport described by `options` and resolves the store.
    ///
    /// # Errors
    /// Returns [`CpiError::Validation`] for invalid options or an
    /// unresolvable store directory.
    pub async fn new(options: &CpiOptions) -> Result<Self, CpiError> {
        options.validate()?;
        let inner: Arc<dyn Runner> = match options.remote() {
            Some(remote) => {
                tracing::info!(host = remote.host, username = remote.username, "using remote hypervisor");
                Arc::new(RemoteRunner::new(remote.host, remote.username, remote.private_key))
            }
            None => {
                tracing::info!("using local hypervisor");
                Arc::new(LocalRunner::new())
            }
        };
        Self::from_runner(options, Arc::new(TimedRunner::new(inner))).await
    }

    /// Like [`Cpi::new`] with a caller-supplied transport.
    ///
    /// # Errors
    /// See [`Cpi::new`].
    pub async fn from_runner(options: &CpiOptions, runner: Arc<dyn Runner>) -> Result<Self, CpiError> {
        let store = resolve_dir(&options.store_dir, runner.as_ref()).await?;
        tracing::debug!(store = %store, "resolved store directory");

        Ok(Self {
            ctx: ActionContext {
                driver: Driver::new(runner.clone(), options.bin_path.clone(), options.retrier()),
                stemcells: Registry::new(format!("{store}/stemcells"), runner.clone()),
                vms: Registry::new(format!("{store}/vms"), runner.clone()),
                disks: Registry::new(format!("{store}/disks"), runner),
                agent_options: options.agent.clone(),
            },
        })
    }

    #[must_use]
    pub fn context(&self) -> &ActionContext {
        &self.ctx
    }

    // ── Stemcells ────────────────────────────────────────────────────────────

    /// # Errors
    /// See [`CreateStemcell::run`].
    pub async fn create_stemcell(&self, image_path: &Path, _cloud_props: &Value) -> Result<StemcellId, CpiError> {
        CreateStemcell::new(&self.ctx, image_path).run().await
    }

    /// # Errors
    /// See [`DeleteStemcell::run`].
    pub async fn delete_stemcell(&self, stemcell_id: &StemcellId) -> Result<(), CpiError> {
        DeleteStemcell::new(&self.ctx, stemcell_id).run().await
    }

    // ── Machines ─────────────────────────────────────────────────────────────

    /// Clones, shapes and boots a machine with its ephemeral disk attached.
    ///
    /// # Errors
    /// Returns the error of the first failing step.
    pub async fn create_vm(
        &self,
        agent_id: &str,
        stemcell_id: &StemcellId,
        cloud_props: &Value,
        networks: &Value,
        env: Value,
    ) -> Result<VmId, CpiError> {
        let props = actions::vm_props(cloud_props)?;
        let (disk_size, gui) = (props.disk, props.gui);

        let vm_id = CreateVm::new(&self.ctx, agent_id, stemcell_id, props, networks, env)?
            .run()
            .await?;

        // The agent only bootstraps its ephemeral disk if it is present at
        // first boot.
        let disk_id = CreateDisk::new(&self.ctx, disk_size)?.run().await?;
        AttachDisk::new(&self.ctx, &vm_id, &disk_id, DiskType::Ephemeral).run().await?;

        RebootVm::new(&self.ctx, &vm_id, gui).run().await?;
        Ok(vm_id)
    }

    /// # Errors
    /// See [`DeleteVm::run`].
    pub async fn delete_vm(&self, vm_id: &VmId) -> Result<(), CpiError> {
        DeleteVm::new(&self.ctx, vm_id).run().await
    }

    /// # Errors
    /// See [`HasVm::run`].
    pub async fn has_vm(&self, vm_id: &VmId) -> Result<bool, CpiError> {
        HasVm::new(&self.ctx, vm_id).run().await
    }

    /// Reboots headless.
    ///
    /// # Errors
    /// See [`RebootVm::run`].
    pub async fn reboot_vm(&self, vm_id: &VmId) -> Result<(), CpiError> {
        RebootVm::new(&self.ctx, vm_id, false).run().await
    }

    /// # Errors
    /// See [`SetVmMetadata::run`].
    pub async fn set_vm_metadata(&self, vm_id: &VmId, metadata: &Value) -> Result<(), CpiError> {
        SetVmMetadata::new(&self.ctx, vm_id, metadata).run().await
    }

    /// # Errors
    /// Always [`CpiError::NotSupported`].
    pub async fn configure_networks(&self, _vm_id: &VmId, _networks: &Value) -> Result<(), CpiError> {
        Err(CpiError::NotSupported { method: "configure_networks" })
    }

    /// # Errors
    /// Always [`CpiError::NotSupported`].
    pub async fn current_vm_id(&self) -> Result<VmId, CpiError> {
        Err(CpiError::NotSupported { method: "current_vm_id" })
    }

    // ── Disks ────────────────────────────────────────────────────────────────

    /// Disk placement hints are ignored; every disk lives in the store.
    ///
    /// # Errors
    /// See [`CreateDisk::run`].
    pub async fn create_disk(&self, size_mb: u64, _cloud_props: &Value, _vm_id: Option<&VmId>) -> Result<DiskId, CpiError> {
        CreateDisk::new(&self.ctx, size_mb)?.run().await
    }

    /// # Errors
    /// See [`DeleteDisk::run`].
    pub async fn delete_disk(&self, disk_id: &DiskId) -> Result<(), CpiError> {
        DeleteDisk::new(&self.ctx, disk_id).run().await
    }

    /// Attaches a persistent disk.
    ///
    /// # Errors
    /// See [`AttachDisk::run`].
    pub async fn attach_disk(&self, vm_id: &VmId, disk_id: &DiskId) -> Result<(), CpiError> {
        AttachDisk::new(&self.ctx, vm_id, disk_id, DiskType::Persistent).run().await?;
        Ok(())
    }

    /// # Errors
    /// See [`DetachDisk::run`].
    pub async fn detach_disk(&self, vm_id: &VmId, disk_id: &DiskId) -> Result<(), CpiError> {
        DetachDisk::new(&self.ctx, vm_id, disk_id).run().await
    }

    /// # Errors
    /// See [`HasDisk::run`].
    pub async fn has_disk(&self, disk_id: &DiskId) -> Result<bool, CpiError> {
        HasDisk::new(&self.ctx, disk_id).run().await
    }

    /// # Errors
    /// See [`GetDisks::run`].
    pub async fn get_disks(&self, vm_id: &VmId) -> Result<Vec<String>, CpiError> {
        GetDisks::new(&self.ctx, vm_id).run().await
    }

    /// # Errors
    /// Always [`CpiError::NotSupported`].
    pub async fn snapshot_disk(&self, _disk_id: &DiskId, _metadata: &Value) -> Result<String, CpiError> {
        Err(CpiError::NotSupported { method: "snapshot_disk" })
    }

    /// # Errors
    /// Always [`CpiError::NotSupported`].
    pub async fn delete_snapshot(&self, _snapshot_id: &str) -> Result<(), CpiError> {
        Err(CpiError::NotSupported { method: "delete_snapshot" })
    }
}
