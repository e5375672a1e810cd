//! CPI configuration.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use vbox_driver::{Retrier, DEFAULT_BIN_PATH};

use crate::CpiError;

fn default_bin_path() -> String {
    DEFAULT_BIN_PATH.to_owned()
}

/// Retry policy for busy-machine errors and imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    pub attempts: u32,
    pub pause_secs: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self { attempts: 10, pause_secs: 5 }
    }
}

/// Parsed CPI options document.
#[derive(Clone, Deserialize)]
pub struct CpiOptions {
    /// Hypervisor host; commands run locally when absent or empty.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// PEM/OpenSSH private key contents.
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default = "default_bin_path")]
    pub bin_path: String,
    /// Registry root; a `~/` prefix is resolved on the hypervisor host.
    pub store_dir: String,
    /// Options merged into every agent environment.
    #[serde(default)]
    pub agent: Map<String, Value>,
    #[serde(default)]
    pub retry: RetryOptions,
}

impl fmt::Debug for CpiOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpiOptions")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("bin_path", &self.bin_path)
            .field("store_dir", &self.store_dir)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Host, user and key of a remote hypervisor.
#[derive(Debug, Clone, Copy)]
pub struct RemoteAccess<'a> {
    pub host: &'a str,
    pub username: &'a str,
    pub private_key: &'a str,
}

impl CpiOptions {
    /// Options for a local hypervisor rooted at `store_dir`.
    #[must_use]
    pub fn local(store_dir: impl Into<String>) -> Self {
        Self {
            host: None,
            username: None,
            private_key: None,
            bin_path: default_bin_path(),
            store_dir: store_dir.into(),
            agent: Map::new(),
            retry: RetryOptions::default(),
        }
    }

    /// Parses and validates an options document.
    ///
    /// # Errors
    /// Returns [`CpiError::Json`] for malformed documents and
    /// [`CpiError::Validation`] for invalid values.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CpiError> {
        let options: Self = serde_json::from_slice(bytes)?;
        options.validate()?;
        Ok(options)
    }

    /// # Errors
    /// Returns [`CpiError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), CpiError> {
        if self.remote().is_some() {
            non_empty("username", self.username.as_deref())?;
            non_empty("private_key", self.private_key.as_deref())?;
        }
        non_empty("bin_path", Some(&self.bin_path))?;
        non_empty("store_dir", Some(&self.store_dir))?;
        if self.retry.attempts == 0 {
            return Err(CpiError::Validation { field: "retry.attempts", reason: "must be at least 1".into() });
        }
        Ok(())
    }

    /// Remote access settings, or `None` for local execution.
    #[must_use]
    pub fn remote(&self) -> Option<RemoteAccess<'_>> {
        let host = self.host.as_deref().filter(|h| !h.is_empty())?;
        Some(RemoteAccess {
            host,
            username: self.username.as_deref().unwrap_or_default(),
            private_key: self.private_key.as_deref().unwrap_or_default(),
        })
    }

    #[must_use]
    pub fn retrier(&self) -> Retrier {
        Retrier::new(self.retry.attempts, Duration::from_secs(self.retry.pause_secs))
    }
}

fn non_empty(field: &'static str, value: Option<&str>) -> Result<(), CpiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(CpiError::Validation { field, reason: "must not be empty".into() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(doc: serde_json::Value) -> Result<CpiOptions, CpiError> {
        CpiOptions::from_json(doc.to_string().as_bytes())
    }

    #[test]
    fn local_options_need_only_store_dir() {
        let options = parse(serde_json::json!({ "store_dir": "~/.vbox-cpi" })).expect("valid");
        assert!(options.remote().is_none());
        assert_eq!(options.bin_path, "VBoxManage");
        assert_eq!(options.retrier(), Retrier::default());
    }

    #[test]
    fn remote_options_require_credentials() {
        let err = parse(serde_json::json!({ "host": "192.168.50.1", "username": "ubuntu", "store_dir": "/s" }));
        match err {
            Err(CpiError::Validation { field, .. }) => assert_eq!(field, "private_key"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn empty_host_means_local() {
        let options = parse(serde_json::json!({ "host": "", "store_dir": "/s" })).expect("valid");
        assert!(options.remote().is_none());
    }

    #[test]
    fn blank_store_dir_is_rejected() {
        assert!(matches!(
            parse(serde_json::json!({ "store_dir": "  " })),
            Err(CpiError::Validation { field: "store_dir", .. })
        ));
        assert!(matches!(parse(serde_json::json!({})), Err(CpiError::Json(_))));
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let doc = serde_json::json!({ "store_dir": "/s", "retry": { "attempts": 0 } });
        assert!(matches!(parse(doc), Err(CpiError::Validation { field: "retry.attempts", .. })));
    }

    #[test]
    fn debug_hides_private_key() {
        let doc = serde_json::json!({
            "host": "h", "username": "u", "private_key": "SECRET-KEY", "store_dir": "/s"
        });
        let options = parse(doc).expect("valid");
        assert!(!format!("{options:?}").contains("SECRET-KEY"));
        let remote = options.remote().expect("remote");
        assert_eq!((remote.host, remote.username), ("h", "u"));
    }
}
