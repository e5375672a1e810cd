//! Classified, retried execution of the hypervisor CLI.

use std::fmt;
use std::sync::Arc;

use vbox_core::VmId;

use crate::cdrom::CdromMounter;
use crate::cloner::VmCloner;
use crate::disk::{DiskAttacher, DiskCreator};
use crate::finder::VmFinder;
use crate::hot_plug::HotPlugger;
use crate::importer::VmImporter;
use crate::network::NetworkConfigurer;
use crate::runner::{command_line, CommandOutput, Runner};
use crate::vm::Vm;
use crate::{DriverError, Retrier};

/// Default name of the hypervisor CLI.
pub const DEFAULT_BIN_PATH: &str = "VBoxManage";

/// Output marker of a machine that is temporarily locked.
pub const NOT_READY_MARKER: &str = "VBoxManage: error: The object is not ready";
/// Output marker printed with exit code 0 when kernel drivers are missing.
pub const DRIVER_NOT_LOADED_MARKER: &str = "failed to open /dev/vboxnetctl";
/// Output marker of an error that still exited 0.
pub const ERROR_MARKER: &str = "VBoxManage: error:";
/// Exit code of a CLI whose helper executables are missing.
pub const EXIT_BROKEN_INSTALLATION: i32 = 126;

/// Per-call execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOpts {
    /// Return the output of a non-zero exit instead of failing.
    pub ignore_non_zero_exit_code: bool,
}

/// Runs hypervisor commands through a [`Runner`].
///
/// Every command is retried while it fails with the "object is not ready"
/// marker; all other failures are classified once retries end.
#[derive(Clone)]
pub struct Driver {
    runner: Arc<dyn Runner>,
    bin_path: String,
    retrier: Retrier,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("bin_path", &self.bin_path)
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}

impl Driver {
    #[must_use]
    pub fn new(runner: Arc<dyn Runner>, bin_path: impl Into<String>, retrier: Retrier) -> Self {
        Self { runner, bin_path: bin_path.into(), retrier }
    }

    /// The transport commands are sent through.
    #[must_use]
    pub fn runner(&self) -> &Arc<dyn Runner> {
        &self.runner
    }

    #[must_use]
    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Runs the CLI with `args` and returns its normalized output.
    ///
    /// # Errors
    /// See [`classify`]; transport failures propagate unchanged.
    pub async fn execute(&self, args: &[&str]) -> Result<String, DriverError> {
        self.execute_with(args, ExecuteOpts::default()).await
    }

    /// Runs the CLI with explicit options.
    ///
    /// # Errors
    /// See [`classify`]; transport failures propagate unchanged.
    pub async fn execute_with(&self, args: &[&str], opts: ExecuteOpts) -> Result<String, DriverError> {
        let runner = &self.runner;
        let bin = self.bin_path.as_str();

        tracing::debug!(command = %command_line(bin, args), "hypervisor command");
        let output = self
            .retrier
            .retry(move || async move {
                let output = runner.execute(bin, args).await?;
                if is_not_ready(&output) {
                    return Err(DriverError::NotReady {
                        command: args.join(" "),
                        output: output.output,
                    });
                }
                Ok(output)
            })
            .await?;

        classify(args, output, opts)
    }

    /// Handle for `id` without checking that the machine exists.
    #[must_use]
    pub fn vm(&self, id: VmId) -> Vm {
        Vm::new(id, self.clone())
    }

    #[must_use]
    pub fn vm_finder(&self) -> VmFinder {
        VmFinder::new(self.clone())
    }

    #[must_use]
    pub fn vm_cloner(&self) -> VmCloner {
        VmCloner::new(self.clone())
    }

    #[must_use]
    pub fn vm_importer(&self) -> VmImporter {
        VmImporter::new(self.clone())
    }

    #[must_use]
    pub fn disk_creator(&self) -> DiskCreator {
        DiskCreator::new(self.clone())
    }

    #[must_use]
    pub fn disk_attacher(&self, vm: &Vm) -> DiskAttacher {
        DiskAttacher::new(self.clone(), vm.clone(), self.hot_plugger(vm))
    }

    #[must_use]
    pub fn cdrom_mounter(&self, vm: &Vm) -> CdromMounter {
        CdromMounter::new(self.clone(), vm.clone(), self.hot_plugger(vm))
    }

    #[must_use]
    pub fn network_configurer(&self, vm: &Vm) -> NetworkConfigurer {
        NetworkConfigurer::new(self.clone(), vm.clone())
    }

    fn hot_plugger(&self, vm: &Vm) -> HotPlugger {
        HotPlugger::new(self.clone(), vm.clone())
    }
}

/// Whether `output` is the transient "object is not ready" failure.
#[must_use]
pub fn is_not_ready(output: &CommandOutput) -> bool {
    !output.success() && output.output.contains(NOT_READY_MARKER)
}

/// Turns a finished command into normalized output or a classified error.
///
/// | exit | output contains                | result                 |
/// |------|--------------------------------|------------------------|
/// | 126  | any                            | `BrokenInstallation`   |
/// | ≠ 0  | any                            | `CommandFailed` unless ignored |
/// | 0    | `failed to open /dev/vboxnetctl` | `DriverNotLoaded`    |
/// | 0    | `VBoxManage: error:`           | `CommandFailed`        |
///
/// # Errors
/// As listed above.
pub fn classify(args: &[&str], output: CommandOutput, opts: ExecuteOpts) -> Result<String, DriverError> {
    let CommandOutput { exit_code, output } = output;

    let failed = if exit_code == 0 {
        if output.to_ascii_lowercase().contains(DRIVER_NOT_LOADED_MARKER) {
            return Err(DriverError::DriverNotLoaded { output });
        }
        if output.contains(ERROR_MARKER) {
            tracing::info!(command = %args.join(" "), "error text found in output, assuming failure");
            true
        } else {
            false
        }
    } else if exit_code == EXIT_BROKEN_INSTALLATION {
        return Err(DriverError::BrokenInstallation { command: args.join(" ") });
    } else {
        !opts.ignore_non_zero_exit_code
    };

    if failed {
        return Err(DriverError::CommandFailed {
            command: args.join(" "),
            exit_code,
            output,
        });
    }
    Ok(output.replace("\r\n", "\n"))
}
