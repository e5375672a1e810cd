//! Filesystem-backed resource registry on the hypervisor host.
//!
//! Every resource owns a directory `<root>/<id>/` holding named artifacts.
//! All operations go through the [`Runner`], so the store lives wherever the
//! hypervisor does. Directory creation is idempotent and runs before any
//! write, which makes blind retries of registry steps safe.
//!
//! Ids and artifact keys arrive from requests, so each must name exactly one
//! path component. Anything else is rejected before a command runs.

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use vbox_core::{DiskId, ResourceId, StemcellId, VmId};
use vbox_driver::{DriverError, Runner};

use crate::CpiError;

pub type StemcellRegistry = Registry<StemcellId>;
pub type VmRegistry = Registry<VmId>;
pub type DiskRegistry = Registry<DiskId>;

/// Store of entries identified by `I`.
pub struct Registry<I> {
    root: String,
    runner: Arc<dyn Runner>,
    _id: PhantomData<fn() -> I>,
}

impl<I> fmt::Debug for Registry<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("root", &self.root).finish_non_exhaustive()
    }
}

impl<I> Clone for Registry<I> {
    fn clone(&self) -> Self {
        Self { root: self.root.clone(), runner: Arc::clone(&self.runner), _id: PhantomData }
    }
}

impl<I: ResourceId> Registry<I> {
    /// Registry rooted at the already resolved directory `root`.
    #[must_use]
    pub fn new(root: impl Into<String>, runner: Arc<dyn Runner>) -> Self {
        let root = root.into();
        let root = match root.trim_end_matches('/') {
            "" => "/".to_owned(),
            trimmed => trimmed.to_owned(),
        };
        Self { root, runner, _id: PhantomData }
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Directory of `id`; the id is assumed to be valid.
    #[must_use]
    pub fn path(&self, id: &I) -> String {
        format!("{}/{id}", self.root)
    }

    #[must_use]
    pub fn artifact_path(&self, id: &I, key: &str) -> String {
        format!("{}/{id}/{key}", self.root)
    }

    fn checked_path(&self, id: &I) -> Result<String, CpiError> {
        check_component("id", id.as_ref())?;
        Ok(self.path(id))
    }

    fn checked_artifact_path(&self, id: &I, key: &str) -> Result<String, CpiError> {
        check_component("id", id.as_ref())?;
        check_component("artifact", key)?;
        Ok(self.artifact_path(id, key))
    }

    /// Allocates a fresh id and creates its directory.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub async fn create(&self) -> Result<I, CpiError> {
        let id = I::generate();
        self.register(&id).await?;
        Ok(id)
    }

    /// Creates the directory for an id assigned elsewhere.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub async fn register(&self, id: &I) -> Result<(), CpiError> {
        let path = self.checked_path(id)?;
        self.create_root().await?;
        tracing::debug!(root = %self.root, id = %id, "creating registry entry");
        self.mkdir(&path).await
    }

    /// Allocates a fresh id whose entry is the local directory `dir`.
    ///
    /// The directory is moved, not copied.
    ///
    /// # Errors
    /// Returns an error if the upload fails.
    pub async fn create_from_dir(&self, dir: &Path) -> Result<I, CpiError> {
        self.create_root().await?;
        let id = I::generate();
        tracing::debug!(root = %self.root, id = %id, dir = %dir.display(), "uploading registry entry");
        self.runner.upload(dir, &self.path(&id)).await?;
        Ok(id)
    }

    /// An id that cannot name an entry is reported as absent.
    ///
    /// # Errors
    /// Returns an error only if the listing command cannot be run.
    pub async fn exists(&self, id: &I) -> Result<bool, CpiError> {
        let Ok(path) = self.checked_path(id) else {
            tracing::debug!(root = %self.root, id = %id, "rejecting malformed registry id");
            return Ok(false);
        };
        tracing::debug!(root = %self.root, id = %id, "checking registry entry");
        let output = self.runner.execute("ls", &[&path]).await?;
        Ok(output.success())
    }

    /// Removes the entry and all its artifacts.
    ///
    /// # Errors
    /// Returns an error if removal fails.
    pub async fn delete(&self, id: &I) -> Result<(), CpiError> {
        let path = self.checked_path(id)?;
        self.create_root().await?;
        tracing::debug!(root = %self.root, id = %id, "deleting registry entry");
        self.runner.execute_or_fail("rm", &["-rf", &path]).await?;
        Ok(())
    }

    /// Writes artifact `key`, creating the entry if needed.
    ///
    /// # Errors
    /// Returns an error if the entry or file cannot be written.
    pub async fn create_artifact(&self, id: &I, key: &str, contents: &[u8]) -> Result<(), CpiError> {
        let path = self.checked_artifact_path(id, key)?;
        self.register(id).await?;
        tracing::debug!(id = %id, key, bytes = contents.len(), "writing artifact");
        self.runner.put(&path, contents).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the artifact cannot be read.
    pub async fn get_artifact(&self, id: &I, key: &str) -> Result<Vec<u8>, CpiError> {
        let path = self.checked_artifact_path(id, key)?;
        tracing::debug!(id = %id, key, "reading artifact");
        Ok(self.runner.get(&path).await?)
    }

    /// Removes artifact `key`; a missing artifact is not an error.
    ///
    /// # Errors
    /// Returns an error if removal fails.
    pub async fn delete_artifact(&self, id: &I, key: &str) -> Result<(), CpiError> {
        let path = self.checked_artifact_path(id, key)?;
        tracing::debug!(id = %id, key, "deleting artifact");
        self.runner.execute_or_fail("rm", &["-f", &path]).await?;
        Ok(())
    }

    /// Artifact keys of the entry, creating the entry if needed.
    ///
    /// # Errors
    /// Returns an error if the entry cannot be listed.
    pub async fn list_artifacts(&self, id: &I) -> Result<Vec<String>, CpiError> {
        let path = self.checked_path(id)?;
        self.register(id).await?;
        tracing::debug!(id = %id, "listing artifacts");
        let output = self.runner.execute_or_fail("ls", &["-1", &path]).await?;
        Ok(output.output.lines().filter(|l| !l.is_empty()).map(str::to_owned).collect())
    }

    /// Ids of every entry holding artifact `key`.
    ///
    /// # Errors
    /// Returns an error if the store cannot be searched.
    pub async fn find_entries_with_artifact(&self, key: &str) -> Result<Vec<I>, CpiError> {
        check_component("artifact", key)?;
        self.create_root().await?;
        tracing::debug!(root = %self.root, key, "searching artifacts");
        let output = self
            .runner
            .execute_or_fail("find", &[&self.root, "-mindepth", "2", "-maxdepth", "2", "-name", key])
            .await?;

        let prefix = format!("{}/", self.root.trim_end_matches('/'));
        let mut ids: Vec<I> = output
            .output
            .lines()
            .filter_map(|line| {
                let (id, found) = line.strip_prefix(&prefix)?.split_once('/')?;
                (found == key).then(|| I::from_string(id.to_owned()))
            })
            .collect();
        ids.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
        Ok(ids)
    }

    async fn create_root(&self) -> Result<(), CpiError> {
        self.mkdir(&self.root).await
    }

    async fn mkdir(&self, path: &str) -> Result<(), CpiError> {
        self.runner.execute_or_fail("mkdir", &["-p", path]).await?;
        Ok(())
    }
}

/// Rejects values that are not a single plain path component.
fn check_component(field: &'static str, value: &str) -> Result<(), CpiError> {
    let reason = match value {
        "" => "must not be empty",
        "." | ".." => "must not be a relative directory",
        _ if value.contains(['/', '\0']) => "must not contain '/' or NUL",
        _ => return Ok(()),
    };
    Err(CpiError::Validation { field, reason: format!("'{value}' {reason}") })
}

/// Expands a leading `~/` against the home directory on the runner's host.
///
/// # Errors
/// Returns [`CpiError::Validation`] if the home directory is empty.
pub async fn resolve_dir(path: &str, runner: &dyn Runner) -> Result<String, CpiError> {
    let Some(rest) = path.strip_prefix("~/") else {
        return Ok(path.trim_end_matches('/').to_owned());
    };
    let home = runner.home_dir().await.map_err(|e| match e {
        DriverError::Transport(reason) => CpiError::Validation { field: "store_dir", reason },
        other => other.into(),
    })?;
    Ok(format!("{}/{}", home.trim_end_matches('/'), rest.trim_end_matches('/')))
}
