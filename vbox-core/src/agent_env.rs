//! Agent environment: the configuration document handed to the guest.
//!
//! The document is rebuilt (read, modify, write) whenever the shape of the
//! machine changes and is delivered as `env.json` inside a small disc image.
//!
//! ```json
//! {
//!   "vm": { "id": "...", "name": "..." },
//!   "agent_id": "...",
//!   "networks": { "<name>": { "ip": "...", "mac": "...", ... } },
//!   "disks": { "system": "0", "ephemeral": "1", "persistent": { "disk-...": "2" } },
//!   "env": { ... }
//! }
//! ```
//!
//! Pass-through agent options are merged at the top level and take
//! precedence over the fixed keys.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attachment::DiskType;
use crate::network::NetworkOption;
use crate::{iso9660, CoreError, DiskId, VmId};

/// File name of the document inside the disc image.
pub const ENV_FILE_NAME: &str = "env";

/// Unit of the system disk.
pub const SYSTEM_DISK_UNIT: &str = "0";

/// Resolved settings of one network as seen by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub ip: Option<String>,
    pub netmask: Option<String>,
    pub gateway: Option<String>,
    pub dns: Option<Vec<String>>,
    /// Always an array; the agent rejects a null here.
    #[serde(default)]
    pub default: Vec<String>,
    pub mac: Option<String>,
    #[serde(default)]
    pub cloud_properties: Map<String, Value>,
}

/// Disk units known to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskMap {
    pub system: String,
    pub ephemeral: Option<String>,
    #[serde(default)]
    pub persistent: BTreeMap<String, String>,
}

impl Default for DiskMap {
    fn default() -> Self {
        Self {
            system: SYSTEM_DISK_UNIT.to_owned(),
            ephemeral: None,
            persistent: BTreeMap::new(),
        }
    }
}

/// The agent environment document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentEnv {
    pub vm_id: Option<VmId>,
    pub name: Option<String>,
    pub agent_id: Option<String>,
    pub networks: Option<BTreeMap<String, NetworkSettings>>,
    pub disks: Option<DiskMap>,
    pub env: Value,
    pub agent_options: Map<String, Value>,
}

impl AgentEnv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a stored `env.json`.
    ///
    /// Keys other than `vm`, `agent_id`, `networks`, `disks` and `env` are
    /// kept as agent options.
    ///
    /// # Errors
    /// Returns [`CoreError::Json`] if the document is not a JSON object or a
    /// known key has the wrong shape.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CoreError> {
        let mut doc: Map<String, Value> = serde_json::from_slice(bytes)?;

        let (vm_id, name) = match doc.remove("vm") {
            Some(Value::Object(mut vm)) => (
                take_string(&mut vm, "id").map(VmId::from),
                take_string(&mut vm, "name"),
            ),
            _ => (None, None),
        };
        let agent_id = take_string(&mut doc, "agent_id");
        let networks = take_typed(&mut doc, "networks")?;
        let disks = take_typed(&mut doc, "disks")?;
        let env = doc.remove("env").unwrap_or(Value::Null);

        Ok(Self {
            vm_id,
            name,
            agent_id,
            networks,
            disks,
            env,
            agent_options: doc,
        })
    }

    /// Replaces the network section with the given options.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidMac`] if an option has no usable MAC yet.
    pub fn add_networks(&mut self, options: &[NetworkOption]) -> Result<(), CoreError> {
        let mut networks = BTreeMap::new();
        for no in options {
            networks.insert(
                no.name.clone(),
                NetworkSettings {
                    ip: no.spec.ip.clone(),
                    netmask: no.spec.netmask.clone(),
                    gateway: no.spec.gateway.clone(),
                    dns: no.spec.dns.clone(),
                    default: no.spec.default.clone().unwrap_or_default(),
                    mac: Some(no.formatted_mac()?),
                    cloud_properties: no.spec.cloud_properties.clone(),
                },
            );
        }
        self.networks = Some(networks);
        Ok(())
    }

    /// Resets the disk map to the system disk only.
    pub fn add_empty_disks(&mut self) {
        self.disks = Some(DiskMap::default());
    }

    /// Records `disk_id` at `unit`.
    ///
    /// # Errors
    /// Returns [`CoreError::MissingField`] if the disk map was never
    /// initialized, or [`CoreError::EphemeralDiskAlreadySet`] when adding a
    /// second ephemeral disk.
    pub fn add_disk(
        &mut self,
        disk_type: DiskType,
        disk_id: &DiskId,
        unit: impl Into<String>,
    ) -> Result<(), CoreError> {
        match disk_type {
            DiskType::Ephemeral => self.add_ephemeral_disk(unit.into()),
            DiskType::Persistent => self.add_persistent_disk(disk_id, unit.into()),
        }
    }

    /// Forgets `disk_id`.
    ///
    /// # Errors
    /// Returns [`CoreError::MissingField`] if the disk map was never initialized.
    pub fn remove_disk(&mut self, disk_type: DiskType, disk_id: &DiskId) -> Result<(), CoreError> {
        match disk_type {
            DiskType::Ephemeral => self.remove_ephemeral_disk(),
            DiskType::Persistent => self.remove_persistent_disk(disk_id),
        }
    }

    fn disks_mut(&mut self) -> Result<&mut DiskMap, CoreError> {
        self.disks.as_mut().ok_or(CoreError::MissingField("disks"))
    }

    fn add_ephemeral_disk(&mut self, unit: String) -> Result<(), CoreError> {
        let disks = self.disks_mut()?;
        if let Some(existing) = &disks.ephemeral {
            return Err(CoreError::EphemeralDiskAlreadySet { unit: existing.clone() });
        }
        disks.ephemeral = Some(unit);
        Ok(())
    }

    fn remove_ephemeral_disk(&mut self) -> Result<(), CoreError> {
        self.disks_mut()?.ephemeral = None;
        Ok(())
    }

    fn add_persistent_disk(&mut self, disk_id: &DiskId, unit: String) -> Result<(), CoreError> {
        self.disks_mut()?.persistent.insert(disk_id.to_string(), unit);
        Ok(())
    }

    fn remove_persistent_disk(&mut self, disk_id: &DiskId) -> Result<(), CoreError> {
        self.disks_mut()?.persistent.remove(disk_id.as_str());
        Ok(())
    }

    /// Builds the JSON document.
    ///
    /// # Errors
    /// Returns [`CoreError::MissingField`] naming the first unset required field.
    pub fn to_value(&self) -> Result<Value, CoreError> {
        let vm_id = self.vm_id.as_ref().ok_or(CoreError::MissingField("vm_id"))?;
        let name = self.name.as_ref().ok_or(CoreError::MissingField("name"))?;
        let agent_id = self.agent_id.as_ref().ok_or(CoreError::MissingField("agent_id"))?;
        let networks = self.networks.as_ref().ok_or(CoreError::MissingField("networks"))?;
        let disks = self.disks.as_ref().ok_or(CoreError::MissingField("disks"))?;

        let mut doc = Map::new();
        doc.insert("vm".into(), serde_json::json!({ "id": vm_id, "name": name }));
        doc.insert("agent_id".into(), Value::String(agent_id.clone()));
        doc.insert("networks".into(), serde_json::to_value(networks)?);
        doc.insert("disks".into(), serde_json::to_value(disks)?);
        doc.insert("env".into(), self.env.clone());
        for (key, value) in &self.agent_options {
            doc.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(doc))
    }

    /// Serialized `env.json` contents.
    ///
    /// # Errors
    /// See [`AgentEnv::to_value`].
    pub fn to_json(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(&self.to_value()?)?)
    }

    /// Disc image containing `env.json` as its only file.
    ///
    /// # Errors
    /// See [`AgentEnv::to_value`] and [`iso9660::build_image`].
    pub fn to_iso(&self) -> Result<Vec<u8>, CoreError> {
        iso9660::build_image(ENV_FILE_NAME, &self.to_json()?, Utc::now())
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn take_typed<T: serde::de::DeserializeOwned>(
    map: &mut Map<String, Value>,
    key: &str,
) -> Result<Option<T>, CoreError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
    }
}
