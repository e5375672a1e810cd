//! Command transport abstraction.
//!
//! A [`Runner`] executes programs and moves files on the machine that hosts
//! the hypervisor, either the current machine ([`LocalRunner`]) or a remote
//! one reached over SSH ([`RemoteRunner`]). [`TimedRunner`] decorates any
//! runner with per-call timing.

use std::path::Path;

use async_trait::async_trait;

use crate::DriverError;

mod local;
mod remote;
mod timed;

pub use local::LocalRunner;
pub use remote::RemoteRunner;
pub use timed::TimedRunner;

/// Exit code and combined output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// Standard output followed by standard error.
    pub output: String,
}

impl CommandOutput {
    #[must_use]
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self { exit_code, output: output.into() }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes commands and transfers files on the hypervisor host.
///
/// Implementations must be `Send + Sync` so one runner can be shared by
/// every operation against a host.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs `program` with `args` and reports how it exited.
    ///
    /// A non-zero exit is not an error at this layer.
    ///
    /// # Errors
    /// Returns [`DriverError::Spawn`], [`DriverError::Ssh`] or
    /// [`DriverError::Transport`] if the command could not be run at all.
    async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput, DriverError>;

    /// Like [`Runner::execute`] but treats a non-zero exit as a failure.
    ///
    /// # Errors
    /// Returns [`DriverError::Execute`] naming the command, exit code and output.
    async fn execute_or_fail(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, DriverError> {
        let output = self.execute(program, args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(DriverError::Execute {
                command: command_line(program, args),
                exit_code: output.exit_code,
                output: output.output,
            })
        }
    }

    /// Moves the local directory `src_dir` to `dst_dir` on the host.
    ///
    /// # Errors
    /// Returns an error if the transfer fails.
    async fn upload(&self, src_dir: &Path, dst_dir: &str) -> Result<(), DriverError>;

    /// Writes `contents` to `path` on the host, replacing any existing file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    async fn put(&self, path: &str, contents: &[u8]) -> Result<(), DriverError>;

    /// Reads the file at `path` on the host.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    async fn get(&self, path: &str) -> Result<Vec<u8>, DriverError>;

    /// Home directory of the user commands run as.
    ///
    /// # Errors
    /// Returns [`DriverError::Execute`] if the shell fails, or
    /// [`DriverError::Transport`] if it reports an empty path.
    async fn home_dir(&self) -> Result<String, DriverError> {
        let output = self.execute_or_fail("sh", &["-c", "echo $HOME"]).await?;
        let home = output.output.trim();
        if home.is_empty() {
            return Err(DriverError::Transport("home path must not be empty".into()));
        }
        Ok(home.to_owned())
    }
}

/// Renders a command for error messages and logs.
#[must_use]
pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quotes `s` for a POSIX shell.
#[must_use]
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
