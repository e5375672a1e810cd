//! Error types for the driver crate.

use vbox_core::{CoreError, VmId};

/// Errors raised while running hypervisor commands or moving files.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DriverError {
    /// A transport command required to succeed exited non-zero.
    #[error("command '{command}' exited with {exit_code}: {output}")]
    Execute {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// The hypervisor CLI reported a failure.
    #[error("error executing command '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// The machine was busy; the command may succeed if repeated.
    #[error("object is not ready while executing '{command}': {output}")]
    NotReady { command: String, output: String },

    /// Exit code 126: the CLI is on the path but a helper it needs is missing.
    #[error("command '{command}' exited with 126, most likely a corrupted VirtualBox installation")]
    BrokenInstallation { command: String },

    /// Kernel drivers are not loaded on the host.
    #[error("VirtualBox kernel driver is not loaded (failed to open /dev/vboxnetctl): {output}")]
    DriverNotLoaded { output: String },

    /// The machine is not registered with the hypervisor.
    #[error("vm '{vm_id}' not found: {reason}")]
    VmNotFound { vm_id: VmId, reason: String },

    /// `startvm` did not confirm a successful start.
    #[error("failed to start vm '{vm_id}': {output}")]
    StartFailed { vm_id: VmId, output: String },

    /// Every SCSI controller slot is occupied.
    #[error("failed to obtain port and device on SCSI Controller for vm '{vm_id}'")]
    NoFreePort { vm_id: VmId },

    /// More network options than NICs supported per machine.
    #[error("exceeded maximum number of NICs ({max}), requested {requested}")]
    TooManyNics { requested: usize, max: usize },

    /// A configured NIC reported no MAC address.
    #[error("missing mac address for network '{network}' on vm '{vm_id}'")]
    MissingMac { vm_id: VmId, network: String },

    /// `import` output did not name the suggested machine.
    #[error("couldn't find VM name in import output for '{path}'")]
    ImportNameMissing { path: String },

    /// The imported machine did not show up in `list vms`.
    #[error("failed to import '{path}': machine '{name}' is not listed")]
    ImportNotListed { path: String, name: String },

    /// A program could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// SSH transport failure.
    #[error("ssh: {0}")]
    Ssh(#[from] russh::Error),

    /// Connection, key or authentication problem with the remote host.
    #[error("transport: {0}")]
    Transport(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Whether repeating the same command may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }

    /// Whether an import attempt may succeed when repeated.
    ///
    /// A failed `import` command is final: it may already have registered
    /// a machine, and repeating it would register another copy.
    #[must_use]
    pub fn is_import_retryable(&self) -> bool {
        self.is_transient() || matches!(self, Self::ImportNameMissing { .. } | Self::ImportNotListed { .. })
    }
}
