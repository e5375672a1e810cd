//! Error types for the CPI crate.

use vbox_core::{CoreError, DiskId, VmId};
use vbox_driver::DriverError;

/// Errors returned by lifecycle calls.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CpiError {
    /// A registry entry or machine does not exist.
    #[error("could not find {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },

    /// Options or call arguments are malformed.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The disk is still attached and must be detached first.
    #[error("disk '{disk_id}' is attached to vm '{vm_id}'")]
    DiskAttached { disk_id: DiskId, vm_id: VmId },

    /// The stemcell archive could not be extracted.
    #[error("corrupt image, tar exit status: {exit_code} output: {output}")]
    CorruptImage { exit_code: i32, output: String },

    /// The extracted stemcell has no `.ovf` descriptor.
    #[error("missing OVF file in '{dir}'")]
    MissingDescriptor { dir: String },

    /// The call is part of the lifecycle contract but not offered here.
    #[error("{method} is not implemented")]
    NotSupported { method: &'static str },

    /// The request could not be decoded or names an unknown method.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl CpiError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound { kind, id: id.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_resource() {
        let err = CpiError::not_found("stemcell", "sc-1234");
        assert_eq!(err.to_string(), "could not find stemcell 'sc-1234'");
    }

    #[test]
    fn driver_errors_keep_their_message() {
        let err = CpiError::from(DriverError::NoFreePort { vm_id: VmId::new("vm-1") });
        assert!(err.to_string().contains("SCSI Controller"), "got: {err}");
    }

    #[test]
    fn attached_disk_names_both_ids() {
        let err = CpiError::DiskAttached { disk_id: DiskId::new("disk-1"), vm_id: VmId::new("vm-1") };
        let msg = err.to_string();
        assert!(msg.contains("disk-1") && msg.contains("vm-1"), "got: {msg}");
    }
}
