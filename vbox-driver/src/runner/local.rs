//! Runs commands directly on the current machine.

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandOutput, Runner};
use crate::DriverError;

/// Shell convention for "found but not executable".
const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Shell convention for "command not found".
const EXIT_NOT_FOUND: i32 = 127;

/// Executes programs as child processes, without an intermediate shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl LocalRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for LocalRunner {
    async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput, DriverError> {
        let result = Command::new(program).args(args).kill_on_drop(true).output().await;

        let output = match result {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(CommandOutput::new(EXIT_NOT_FOUND, format!("{program}: command not found")));
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Ok(CommandOutput::new(EXIT_NOT_EXECUTABLE, format!("{program}: {e}")));
            }
            Err(source) => {
                return Err(DriverError::Spawn { program: program.to_owned(), source });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        // Killed by a signal: no exit code.
        let exit_code = output.status.code().unwrap_or(-1);
        Ok(CommandOutput::new(exit_code, combined))
    }

    async fn upload(&self, src_dir: &Path, dst_dir: &str) -> Result<(), DriverError> {
        let src = src_dir.to_string_lossy();
        self.execute_or_fail("mv", &["-f", &*src, dst_dir]).await?;
        Ok(())
    }

    async fn put(&self, path: &str, contents: &[u8]) -> Result<(), DriverError> {
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, DriverError> {
        Ok(tokio::fs::read(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let out = LocalRunner.execute("sh", &["-c", "echo out; echo err >&2; exit 3"]).await;
        match out {
            Ok(out) => {
                assert_eq!(out.exit_code, 3);
                assert_eq!(out.output, "out\nerr\n", "stdout precedes stderr");
            }
            Err(e) => panic!("execute failed: {e}"),
        }
    }

    #[tokio::test]
    async fn arguments_are_not_shell_interpreted() {
        let out = LocalRunner.execute("echo", &["$HOME", "a;b"]).await.expect("execute");
        assert_eq!(out.output.trim(), "$HOME a;b");
    }

    #[tokio::test]
    async fn missing_program_reports_127() {
        let out = LocalRunner
            .execute("definitely-not-a-real-binary-4f1c", &[])
            .await
            .expect("missing program is an exit status, not an error");
        assert_eq!(out.exit_code, EXIT_NOT_FOUND);
    }

    #[tokio::test]
    async fn execute_or_fail_rejects_non_zero_exit() {
        match LocalRunner.execute_or_fail("sh", &["-c", "echo nope; exit 1"]).await {
            Err(DriverError::Execute { exit_code, output, .. }) => {
                assert_eq!(exit_code, 1);
                assert_eq!(output.trim(), "nope");
            }
            other => panic!("expected Execute error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn put_get_and_upload_move_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        tokio::fs::create_dir(&src).await.expect("mkdir");

        let file = src.join("image.ovf");
        let file_str = file.to_string_lossy().into_owned();
        LocalRunner.put(&file_str, b"<ovf/>").await.expect("put");
        assert_eq!(LocalRunner.get(&file_str).await.expect("get"), b"<ovf/>");

        let dst = dir.path().join("dst");
        LocalRunner.upload(&src, &dst.to_string_lossy()).await.expect("upload");
        assert!(!src.exists(), "upload moves the directory");
        assert!(dst.join("image.ovf").exists());
    }
}
