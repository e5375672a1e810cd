//! Entry point for the `vbox-cpi` binary.
//!
//! Reads one request from stdin and writes one response to stdout. Logs go to
//! stderr.

use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;
use vbox_cpi::{dispatch, parse_request, Cpi, CpiError, CpiOptions, Response};

const CONFIG_ENV: &str = "VBOX_CPI_CONFIG";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let response = match run().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "failed to handle request");
            Response::failure(&e)
        }
    };

    let body = match serde_json::to_vec(&response) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            std::process::exit(1);
        }
    };
    let mut stdout = tokio::io::stdout();
    let written = async {
        stdout.write_all(&body).await?;
        stdout.flush().await
    }
    .await;
    if let Err(e) = written {
        tracing::error!(error = %e, "failed to write response");
        std::process::exit(1);
    }
}

async fn run() -> Result<Response, CpiError> {
    let options = load_options().await?;

    let mut input = Vec::new();
    tokio::io::stdin().read_to_end(&mut input).await?;
    let request = parse_request(&input)?;
    tracing::info!(method = %request.method, "handling request");

    let cpi = Cpi::new(&options).await?;
    Ok(dispatch(&cpi, &request).await)
}

async fn load_options() -> Result<CpiOptions, CpiError> {
    let path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os(CONFIG_ENV))
        .map(PathBuf::from)
        .ok_or_else(|| CpiError::InvalidRequest(format!("usage: vbox-cpi <config.json> (or set {CONFIG_ENV})")))?;

    tracing::debug!(path = %path.display(), "loading config");
    let contents = tokio::fs::read(&path).await?;
    CpiOptions::from_json(&contents)
}
