/// Errors produced by the `vbox-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A required agent environment field was not set before serialization.
    #[error("agent env is missing required field '{0}'")]
    MissingField(&'static str),

    /// The agent environment already records an ephemeral disk.
    #[error("ephemeral disk is already set (unit {unit})")]
    EphemeralDiskAlreadySet { unit: String },

    /// A network option carries a cloud type outside `nat`, `natnetwork`, `hostonly`.
    #[error("unknown network type '{0}'")]
    UnknownNetworkType(String),

    /// A disk type string was neither `ephemeral` nor `persistent`.
    #[error("unknown disk type '{0}'")]
    UnknownDiskType(String),

    /// A MAC address could not be formatted.
    #[error("invalid mac address '{0}'")]
    InvalidMac(String),

    /// A disc image could not be assembled.
    #[error("iso image: {0}")]
    Iso(String),

    /// A JSON document could not be encoded or decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
