//! Network options requested for a machine.
//!
//! The orchestrator sends a map of network name to settings; each entry
//! becomes a [`NetworkOption`]. The hypervisor-side network name and kind are
//! carried in `cloud_properties`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::CoreError;

/// Host network used when `cloud_properties.name` is absent.
pub const DEFAULT_NETWORK_NAME: &str = "vboxnet0";

/// Kind of hypervisor network a NIC is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Private NAT behind the host.
    Nat,
    /// Named NAT network shared between machines.
    NatNetwork,
    /// Host-only adapter.
    HostOnly,
}

impl NetworkType {
    /// Returns the name used by the hypervisor CLI.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nat => "nat",
            Self::NatNetwork => "natnetwork",
            Self::HostOnly => "hostonly",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nat" => Ok(Self::Nat),
            "natnetwork" => Ok(Self::NatNetwork),
            "hostonly" => Ok(Self::HostOnly),
            other => Err(CoreError::UnknownNetworkType(other.to_owned())),
        }
    }
}

/// Settings for one network as sent by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub netmask: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub dns: Option<Vec<String>>,
    #[serde(default)]
    pub default: Option<Vec<String>>,
    #[serde(default)]
    pub cloud_properties: Map<String, Value>,
}

/// One network attachment of a machine.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkOption {
    pub name: String,
    pub spec: NetworkSpec,
    /// Raw MAC as reported by the hypervisor, e.g. `080027ABCDEF`.
    pub mac: Option<String>,
}

impl NetworkOption {
    /// Parses the orchestrator's `networks` argument.
    ///
    /// Options come back ordered by network name.
    ///
    /// # Errors
    /// Returns [`CoreError::Json`] if an entry does not have the expected shape.
    pub fn parse_all(networks: &Value) -> Result<Vec<Self>, CoreError> {
        let specs: BTreeMap<String, NetworkSpec> = match networks {
            Value::Null => BTreeMap::new(),
            other => serde_json::from_value(other.clone())?,
        };
        Ok(specs
            .into_iter()
            .map(|(name, spec)| Self { name, spec, mac: None })
            .collect())
    }

    /// Hypervisor network name, defaulting to [`DEFAULT_NETWORK_NAME`].
    #[must_use]
    pub fn cloud_name(&self) -> &str {
        self.spec
            .cloud_properties
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_NETWORK_NAME)
    }

    /// Hypervisor network kind, defaulting to host-only.
    ///
    /// # Errors
    /// Returns [`CoreError::UnknownNetworkType`] for anything other than
    /// `nat`, `natnetwork` or `hostonly`.
    pub fn cloud_type(&self) -> Result<NetworkType, CoreError> {
        match self.spec.cloud_properties.get("type") {
            None | Some(Value::Null) => Ok(NetworkType::HostOnly),
            Some(Value::String(s)) => s.parse(),
            Some(other) => Err(CoreError::UnknownNetworkType(other.to_string())),
        }
    }

    /// MAC formatted as lower-case colon-separated pairs.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidMac`] if the MAC is unset or is not 12 hex digits.
    pub fn formatted_mac(&self) -> Result<String, CoreError> {
        let mac = self.mac.as_deref().unwrap_or_default();
        format_mac(mac)
    }
}

/// Formats a bare hex MAC (`080027ABCDEF`) as `08:00:27:ab:cd:ef`.
///
/// # Errors
/// Returns [`CoreError::InvalidMac`] if `mac` is not exactly 12 hex digits.
pub fn format_mac(mac: &str) -> Result<String, CoreError> {
    if mac.len() != 12 || !mac.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CoreError::InvalidMac(mac.to_owned()));
    }
    let lower = mac.to_ascii_lowercase();
    let pairs: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
    Ok(pairs.join(":"))
}
