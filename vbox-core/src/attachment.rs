//! Disk attachment records stored on a VM's registry entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{CoreError, DiskId};

/// Artifact key suffix shared by all attachment records.
pub const ATTACHMENT_SUFFIX: &str = "-disk-attachment.json";

/// Role of an attached disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    /// Scratch disk created with the machine and destroyed with it.
    Ephemeral,
    /// Disk that outlives the machine and may move between machines.
    Persistent,
}

impl DiskType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::Persistent => "persistent",
        }
    }
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiskType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ephemeral" => Ok(Self::Ephemeral),
            "persistent" => Ok(Self::Persistent),
            other => Err(CoreError::UnknownDiskType(other.to_owned())),
        }
    }
}

/// A `(port, device)` coordinate on the SCSI controller.
///
/// Serialized as a two-element array. Numeric strings are accepted on input
/// since older records stored the parsed text verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortDevice {
    pub port: u32,
    pub device: u32,
}

impl PortDevice {
    #[must_use]
    pub fn new(port: u32, device: u32) -> Self {
        Self { port, device }
    }
}

impl fmt::Display for PortDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.port, self.device)
    }
}

impl Serialize for PortDevice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.port, self.device].serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Coordinate {
    Number(u32),
    Text(String),
}

impl Coordinate {
    fn into_u32<E: serde::de::Error>(self) -> Result<u32, E> {
        match self {
            Self::Number(n) => Ok(n),
            Self::Text(s) => s
                .parse()
                .map_err(|_| E::custom(format!("invalid controller coordinate '{s}'"))),
        }
    }
}

impl<'de> Deserialize<'de> for PortDevice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (port, device) = <(Coordinate, Coordinate)>::deserialize(deserializer)?;
        Ok(Self {
            port: port.into_u32()?,
            device: device.into_u32()?,
        })
    }
}

/// Attachment record, stored as `<disk-id>-disk-attachment.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskAttachment {
    pub port_and_device: PortDevice,
    #[serde(rename = "type")]
    pub disk_type: DiskType,
}

impl DiskAttachment {
    /// Decodes an attachment artifact.
    ///
    /// # Errors
    /// Returns [`CoreError::Json`] if the bytes are not a valid record.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes the record for storage.
    ///
    /// # Errors
    /// Returns [`CoreError::Json`] if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Artifact key of the attachment record for `disk_id`.
#[must_use]
pub fn attachment_key(disk_id: &DiskId) -> String {
    format!("{disk_id}{ATTACHMENT_SUFFIX}")
}

/// Returns the disk id encoded in an attachment artifact key.
#[must_use]
pub fn disk_id_from_key(key: &str) -> Option<DiskId> {
    key.strip_suffix(ATTACHMENT_SUFFIX)
        .filter(|id| !id.is_empty())
        .map(DiskId::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_serializes_to_wire_shape() {
        let a = DiskAttachment {
            port_and_device: PortDevice::new(2, 0),
            disk_type: DiskType::Persistent,
        };
        let json: serde_json::Value = serde_json::from_slice(&a.to_vec().expect("encode")).expect("json");
        assert_eq!(json, serde_json::json!({ "port_and_device": [2, 0], "type": "persistent" }));
    }

    #[test]
    fn attachment_accepts_string_coordinates() {
        let a = DiskAttachment::from_slice(br#"{"port_and_device":["3","0"],"type":"ephemeral"}"#)
            .expect("decode");
        assert_eq!(a.port_and_device, PortDevice::new(3, 0));
        assert_eq!(a.disk_type, DiskType::Ephemeral);
    }

    #[test]
    fn attachment_rejects_unknown_type() {
        let err = DiskAttachment::from_slice(br#"{"port_and_device":[0,0],"type":"scratch"}"#);
        assert!(matches!(err, Err(CoreError::Json(_))));
    }

    #[test]
    fn disk_type_parses_from_str() {
        assert_eq!("persistent".parse::<DiskType>().expect("parse"), DiskType::Persistent);
        assert!(matches!("other".parse::<DiskType>(), Err(CoreError::UnknownDiskType(_))));
    }

    #[test]
    fn attachment_key_round_trips_disk_id() {
        let id = DiskId::new("disk-abc");
        let key = attachment_key(&id);
        assert_eq!(key, "disk-abc-disk-attachment.json");
        assert_eq!(disk_id_from_key(&key), Some(id));
        assert_eq!(disk_id_from_key("env.json"), None);
        assert_eq!(disk_id_from_key(ATTACHMENT_SUFFIX), None);
    }
}
