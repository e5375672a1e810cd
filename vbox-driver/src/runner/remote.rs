//! Runs commands on a remote host over one persistent SSH session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::keys::{self, PrivateKeyWithHashAlg};
use russh::ChannelMsg;
use tokio::sync::{Mutex, MutexGuard};

use super::{shell_escape, CommandOutput, Runner};
use crate::DriverError;

const DEFAULT_SSH_PORT: u16 = 22;

/// Client handler that accepts any server key.
pub(crate) struct SshHandler;

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Raw result of one remote command.
#[derive(Default)]
struct ChannelOutput {
    exit_code: Option<i32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Executes commands over SSH, authenticating with a private key.
///
/// The session is opened on first use and shared by every later call.
/// All traffic goes through one lock; calls queue rather than multiplex.
pub struct RemoteRunner {
    host: String,
    username: String,
    private_key: String,
    session: Mutex<Option<client::Handle<SshHandler>>>,
}

impl std::fmt::Debug for RemoteRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRunner")
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RemoteRunner {
    /// Creates a runner; no connection is made until the first call.
    ///
    /// `host` may carry an explicit `:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, username: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            private_key: private_key.into(),
            session: Mutex::new(None),
        }
    }

    fn address(&self) -> String {
        if self.host.contains(':') {
            self.host.clone()
        } else {
            format!("{}:{DEFAULT_SSH_PORT}", self.host)
        }
    }

    async fn connect(&self) -> Result<client::Handle<SshHandler>, DriverError> {
        let addr = self.address();
        tracing::info!(%addr, user = %self.username, "connecting ssh session");

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, addr.as_str(), SshHandler).await?;

        let key = keys::decode_secret_key(&self.private_key, None)
            .map_err(|e| DriverError::Transport(format!("failed to decode private key: {e}")))?;
        let key = PrivateKeyWithHashAlg::new(Arc::new(key), None);

        let auth = handle.authenticate_publickey(&self.username, key).await?;
        if !auth.success() {
            return Err(DriverError::Transport(format!(
                "ssh authentication rejected for user '{}' on {addr}",
                self.username
            )));
        }

        tracing::info!(%addr, "ssh session authenticated");
        Ok(handle)
    }

    /// Locks the session, connecting first if needed.
    async fn session(&self) -> Result<MutexGuard<'_, Option<client::Handle<SshHandler>>>, DriverError> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        Ok(guard)
    }

    async fn run(&self, command: &str, stdin: Option<&[u8]>) -> Result<ChannelOutput, DriverError> {
        let mut guard = self.session().await?;
        let handle = guard
            .as_ref()
            .ok_or_else(|| DriverError::Transport("ssh session unavailable".into()))?;

        let opened = handle.channel_open_session().await;
        let mut channel = forget_on_error(&mut *guard, opened)?;
        channel.exec(true, command).await?;
        if let Some(bytes) = stdin {
            channel.data(bytes).await?;
            channel.eof().await?;
        }

        let mut out = ChannelOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => out.stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => out.stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => {
                    out.exit_code = Some(i32::try_from(exit_status).unwrap_or(i32::MAX));
                }
                ChannelMsg::ExitSignal { .. } => out.exit_code = out.exit_code.or(Some(255)),
                _ => {}
            }
        }
        Ok(out)
    }

    async fn run_or_fail(&self, command: &str, stdin: Option<&[u8]>) -> Result<ChannelOutput, DriverError> {
        let out = self.run(command, stdin).await?;
        match out.exit_code {
            Some(0) => Ok(out),
            code => Err(DriverError::Execute {
                command: command.to_owned(),
                exit_code: code.unwrap_or(-1),
                output: combined(&out),
            }),
        }
    }
}

/// Clears the cached session when `result` failed, so the next call reconnects.
fn forget_on_error<S, T>(slot: &mut Option<S>, result: Result<T, russh::Error>) -> Result<T, DriverError> {
    result.map_err(|e| {
        if slot.take().is_some() {
            tracing::warn!(error = %e, "dropping broken ssh session");
        }
        DriverError::from(e)
    })
}

fn combined(out: &ChannelOutput) -> String {
    let mut s = String::from_utf8_lossy(&out.stdout).into_owned();
    s.push_str(&String::from_utf8_lossy(&out.stderr));
    s
}

fn escaped_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .map(shell_escape)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lists `root` breadth-first: directories relative to `root`, then files.
async fn walk(root: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), DriverError> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(rel) = pending.pop() {
        let mut entries = tokio::fs::read_dir(root.join(&rel)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let child = rel.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                dirs.push(child.clone());
                pending.push(child);
            } else {
                files.push(child);
            }
        }
    }
    Ok((dirs, files))
}

#[async_trait]
impl Runner for RemoteRunner {
    async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput, DriverError> {
        let command = escaped_command(program, args);
        tracing::debug!(%command, "remote execute");
        let out = self.run(&command, None).await?;
        let exit_code = out.exit_code.ok_or_else(|| {
            DriverError::Transport(format!("command '{command}' finished without exit status"))
        })?;
        Ok(CommandOutput::new(exit_code, combined(&out)))
    }

    async fn upload(&self, src_dir: &Path, dst_dir: &str) -> Result<(), DriverError> {
        let (dirs, files) = walk(src_dir).await?;

        self.run_or_fail(&escaped_command("mkdir", &["-p", dst_dir]), None).await?;
        for dir in dirs {
            let target = format!("{dst_dir}/{}", dir.to_string_lossy());
            self.run_or_fail(&escaped_command("mkdir", &["-p", &target]), None).await?;
        }
        for file in files {
            let contents = tokio::fs::read(src_dir.join(&file)).await?;
            let target = format!("{dst_dir}/{}", file.to_string_lossy());
            self.put(&target, &contents).await?;
        }
        Ok(())
    }

    async fn put(&self, path: &str, contents: &[u8]) -> Result<(), DriverError> {
        let command = format!("cat > {}", shell_escape(path));
        self.run_or_fail(&command, Some(contents)).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, DriverError> {
        let out = self.run_or_fail(&escaped_command("cat", &[path]), None).await?;
        Ok(out.stdout)
    }
}
