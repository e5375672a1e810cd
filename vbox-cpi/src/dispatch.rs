//! JSON request/response protocol.
//!
//! One request per process: `{"method", "arguments", "context"}` in,
//! `{"result", "error", "log"}` out.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use vbox_core::{DiskId, StemcellId, VmId};

use crate::{Cpi, CpiError};

// ── Request / response types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Director context; carried but unused.
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub ok_to_retry: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub result: Value,
    pub error: Option<ResponseError>,
    pub log: String,
}

impl Response {
    #[must_use]
    pub fn success(result: Value) -> Self {
        Self { result, error: None, log: String::new() }
    }

    #[must_use]
    pub fn failure(err: &CpiError) -> Self {
        let kind = match err {
            CpiError::NotSupported { .. } => "Bosh::Clouds::NotImplemented",
            CpiError::InvalidRequest(_) => "Bosh::Clouds::CpiError",
            _ => "Bosh::Clouds::CloudError",
        };
        Self {
            result: Value::Null,
            error: Some(ResponseError { kind: kind.to_owned(), message: err.to_string(), ok_to_retry: false }),
            log: String::new(),
        }
    }
}

/// Decodes a request document.
///
/// # Errors
/// Returns [`CpiError::InvalidRequest`] if `bytes` is not a request.
pub fn parse_request(bytes: &[u8]) -> Result<Request, CpiError> {
    serde_json::from_slice(bytes).map_err(|e| CpiError::InvalidRequest(e.to_string()))
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Runs `request` against `cpi`; failures become the response's error object.
pub async fn dispatch(cpi: &Cpi, request: &Request) -> Response {
    let start = Instant::now();
    let outcome = call(cpi, &request.method, Args(&request.arguments)).await;
    let elapsed_ms = start.elapsed().as_millis();

    match outcome {
        Ok(result) => {
            tracing::info!(method = %request.method, elapsed_ms, "request succeeded");
            Response::success(result)
        }
        Err(e) => {
            tracing::error!(method = %request.method, elapsed_ms, error = %e, "request failed");
            Response::failure(&e)
        }
    }
}

async fn call(cpi: &Cpi, method: &str, args: Args<'_>) -> Result<Value, CpiError> {
    match method {
        "info" => Ok(json!({ "stemcell_formats": ["general-ovf"] })),
        "create_stemcell" => {
            let image_path = args.str(0, "image_path")?;
            let id = cpi.create_stemcell(Path::new(image_path), args.value(1)).await?;
            Ok(json!(id))
        }
        "delete_stemcell" => {
            cpi.delete_stemcell(&StemcellId::new(args.str(0, "stemcell_cid")?)).await?;
            Ok(Value::Null)
        }
        "create_vm" => {
            let agent_id = args.str(0, "agent_id")?;
            let stemcell_id = StemcellId::new(args.str(1, "stemcell_cid")?);
            let id = cpi
                .create_vm(agent_id, &stemcell_id, args.value(2), args.value(3), args.value(5).clone())
                .await?;
            Ok(json!(id))
        }
        "delete_vm" => {
            cpi.delete_vm(&args.vm_id(0)?).await?;
            Ok(Value::Null)
        }
        "has_vm" => Ok(json!(cpi.has_vm(&args.vm_id(0)?).await?)),
        "reboot_vm" => {
            cpi.reboot_vm(&args.vm_id(0)?).await?;
            Ok(Value::Null)
        }
        "set_vm_metadata" => {
            cpi.set_vm_metadata(&args.vm_id(0)?, args.value(1)).await?;
            Ok(Value::Null)
        }
        "configure_networks" => {
            cpi.configure_networks(&args.vm_id(0)?, args.value(1)).await?;
            Ok(Value::Null)
        }
        "current_vm_id" => Ok(json!(cpi.current_vm_id().await?)),
        "create_disk" => {
            let size = args.value(0).as_u64().ok_or_else(|| invalid_argument(0, "size"))?;
            let vm_id = args.value(2).as_str().map(VmId::new);
            let id = cpi.create_disk(size, args.value(1), vm_id.as_ref()).await?;
            Ok(json!(id))
        }
        "delete_disk" => {
            cpi.delete_disk(&args.disk_id(0)?).await?;
            Ok(Value::Null)
        }
        "attach_disk" => {
            cpi.attach_disk(&args.vm_id(0)?, &args.disk_id(1)?).await?;
            Ok(Value::Null)
        }
        "detach_disk" => {
            cpi.detach_disk(&args.vm_id(0)?, &args.disk_id(1)?).await?;
            Ok(Value::Null)
        }
        "has_disk" => Ok(json!(cpi.has_disk(&args.disk_id(0)?).await?)),
        "get_disks" => Ok(json!(cpi.get_disks(&args.vm_id(0)?).await?)),
        "snapshot_disk" => Ok(json!(cpi.snapshot_disk(&args.disk_id(0)?, args.value(1)).await?)),
        "delete_snapshot" => {
            cpi.delete_snapshot(args.str(0, "snapshot_cid")?).await?;
            Ok(Value::Null)
        }
        other => Err(CpiError::InvalidRequest(format!("unknown method '{other}'"))),
    }
}

// ── Argument helpers ─────────────────────────────────────────────────────────

static NULL: Value = Value::Null;

#[derive(Clone, Copy)]
struct Args<'a>(&'a [Value]);

impl<'a> Args<'a> {
    /// Positional argument; absent trailing arguments read as `null`.
    fn value(self, index: usize) -> &'a Value {
        self.0.get(index).unwrap_or(&NULL)
    }

    fn str(self, index: usize, name: &str) -> Result<&'a str, CpiError> {
        self.value(index).as_str().ok_or_else(|| invalid_argument(index, name))
    }

    fn vm_id(self, index: usize) -> Result<VmId, CpiError> {
        self.str(index, "vm_cid").map(VmId::new)
    }

    fn disk_id(self, index: usize) -> Result<DiskId, CpiError> {
        self.str(index, "disk_cid").map(DiskId::new)
    }
}

fn invalid_argument(index: usize, name: &str) -> CpiError {
    CpiError::InvalidRequest(format!("argument {index} ({name}) is missing or has the wrong type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpiOptions;
    use proptest::prelude::*;
    use std::sync::Arc;
    use vbox_driver::testing::{FakeHypervisor, FakeState};

    async fn cpi() -> (Cpi, Arc<FakeHypervisor>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let fake = Arc::new(FakeHypervisor::new());
        let options = CpiOptions::local(dir.path().to_string_lossy());
        let cpi = Cpi::from_runner(&options, fake.clone()).await.expect("cpi");
        (cpi, fake, dir)
    }

    fn request(raw: &str) -> Request {
        parse_request(raw.as_bytes()).expect("request")
    }

    #[test]
    fn parses_request_without_optional_fields() {
        let req = request(r#"{"method":"info"}"#);
        assert_eq!(req.method, "info");
        assert!(req.arguments.is_empty());
        assert_eq!(req.context, Value::Null);
    }

    #[test]
    fn malformed_request_is_invalid() {
        assert!(matches!(parse_request(b"{"), Err(CpiError::InvalidRequest(_))));
    }

    #[test]
    fn failure_serializes_to_wire_shape() {
        let response = Response::failure(&CpiError::NotSupported { method: "current_vm_id" });
        assert_eq!(
            serde_json::to_value(&response).expect("json"),
            json!({
                "result": null,
                "error": { "type": "Bosh::Clouds::NotImplemented", "message": "current_vm_id is not implemented", "ok_to_retry": false },
                "log": ""
            })
        );
    }

    proptest! {
        #[test]
        fn request_decoding_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = parse_request(&bytes);
        }

        #[test]
        fn method_and_arguments_survive_decoding(method in "[a-z_]{1,24}", args in proptest::collection::vec("[ -~]{0,16}", 0..4)) {
            let raw = serde_json::to_vec(&json!({ "method": method, "arguments": args })).expect("encode");
            let req = parse_request(&raw).expect("decode");
            prop_assert_eq!(req.method, method);
            prop_assert_eq!(req.arguments, args.into_iter().map(Value::String).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn info_lists_stemcell_formats() {
        let (cpi, _fake, _dir) = cpi().await;
        let response = dispatch(&cpi, &request(r#"{"method":"info","arguments":[]}"#)).await;
        assert_eq!(response.result["stemcell_formats"], json!(["general-ovf"]));
        assert_eq!(response.error, None);
    }

    #[tokio::test]
    async fn has_vm_reports_boolean() {
        let (cpi, fake, _dir) = cpi().await;
        let uuid = fake.register("vm-1", FakeState::Running);

        let raw = format!(r#"{{"method":"has_vm","arguments":["{uuid}"]}}"#);
        assert_eq!(dispatch(&cpi, &request(&raw)).await.result, json!(true));
        let raw = r#"{"method":"has_vm","arguments":["missing"]}"#;
        assert_eq!(dispatch(&cpi, &request(raw)).await.result, json!(false));
    }

    #[tokio::test]
    async fn unknown_method_and_bad_arguments_are_cpi_errors() {
        let (cpi, _fake, _dir) = cpi().await;
        for raw in [r#"{"method":"launch_rocket"}"#, r#"{"method":"has_vm","arguments":[42]}"#] {
            let response = dispatch(&cpi, &request(raw)).await;
            let error = response.error.expect("error");
            assert_eq!(error.kind, "Bosh::Clouds::CpiError", "request: {raw}");
        }
    }

    #[tokio::test]
    async fn action_failures_are_cloud_errors() {
        let (cpi, _fake, _dir) = cpi().await;
        let response = dispatch(&cpi, &request(r#"{"method":"delete_disk","arguments":["disk-nope"]}"#)).await;
        let error = response.error.expect("error");
        assert_eq!(error.kind, "Bosh::Clouds::CloudError");
        assert_eq!(error.message, "could not find disk 'disk-nope'");
        assert!(!error.ok_to_retry);
    }
}
