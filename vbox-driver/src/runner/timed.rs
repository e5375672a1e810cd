//! Timing decorator for any [`Runner`].

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{CommandOutput, Runner};
use crate::DriverError;

const ISO_ELIDED: &str = "<iso elided>";

/// Logs the duration and a redacted argument summary of every call.
#[derive(Clone)]
pub struct TimedRunner {
    inner: Arc<dyn Runner>,
}

impl TimedRunner {
    #[must_use]
    pub fn new(inner: Arc<dyn Runner>) -> Self {
        Self { inner }
    }
}

/// Joins arguments for logging, hiding disc image paths.
#[must_use]
pub fn redact_args<'a>(args: impl IntoIterator<Item = &'a str>) -> String {
    args.into_iter()
        .map(|a| if a.ends_with(".iso") { ISO_ELIDED } else { a })
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_call<T>(method: &'static str, started: Instant, args: &str, result: &Result<T, DriverError>) {
    let elapsed_ms = started.elapsed().as_millis();
    match result {
        Ok(_) => tracing::debug!(method, elapsed_ms, args, "runner call"),
        Err(e) => tracing::debug!(method, elapsed_ms, args, error = %e, "runner call failed"),
    }
}

#[async_trait]
impl Runner for TimedRunner {
    async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput, DriverError> {
        let started = Instant::now();
        let result = self.inner.execute(program, args).await;
        let summary = redact_args(std::iter::once(program).chain(args.iter().copied()));
        log_call("execute", started, &summary, &result);
        result
    }

    async fn upload(&self, src_dir: &Path, dst_dir: &str) -> Result<(), DriverError> {
        let started = Instant::now();
        let result = self.inner.upload(src_dir, dst_dir).await;
        let src = src_dir.to_string_lossy();
        log_call("upload", started, &redact_args([&*src, dst_dir]), &result);
        result
    }

    async fn put(&self, path: &str, contents: &[u8]) -> Result<(), DriverError> {
        let started = Instant::now();
        let result = self.inner.put(path, contents).await;
        let summary = format!("{} ({} bytes)", redact_args([path]), contents.len());
        log_call("put", started, &summary, &result);
        result
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, DriverError> {
        let started = Instant::now();
        let result = self.inner.get(path).await;
        log_call("get", started, &redact_args([path]), &result);
        result
    }
}
