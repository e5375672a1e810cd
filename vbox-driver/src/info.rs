//! Parsers for `showvminfo --machinereadable` and friends.
//!
//! Machine-readable output is one `key="value"` pair per line; keys that
//! contain spaces are quoted as well (`"SCSI Controller-0-0"="none"`).

use std::collections::BTreeMap;
use std::fmt;

use vbox_core::PortDevice;

const INACCESSIBLE_NAME: &str = "<inaccessible>";
const SCSI_CONTROLLER: &str = "SCSI Controller";

/// Power state as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VmState {
    Running,
    PowerOff,
    Paused,
    Saved,
    Aborted,
    /// Registered but unreadable, or no state reported.
    Inaccessible,
    Other(String),
}

impl VmState {
    fn from_raw(raw: &str) -> Self {
        match raw {
            "running" => Self::Running,
            "poweroff" => Self::PowerOff,
            "paused" => Self::Paused,
            "saved" => Self::Saved,
            "aborted" => Self::Aborted,
            "inaccessible" => Self::Inaccessible,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::PowerOff => "poweroff",
            Self::Paused => "paused",
            Self::Saved => "saved",
            Self::Aborted => "aborted",
            Self::Inaccessible => "inaccessible",
            Self::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// Splits machine-readable output into unquoted `(key, value)` pairs.
pub fn pairs(output: &str) -> impl Iterator<Item = (&str, &str)> {
    output.lines().filter_map(|line| {
        let line = line.trim_end_matches('\r');
        let (key, value) = split_pair(line)?;
        Some((unquote(key), unquote(value)))
    })
}

fn split_pair(line: &str) -> Option<(&str, &str)> {
    if let Some(rest) = line.strip_prefix('"') {
        let end = rest.find('"')?;
        let value = rest[end + 1..].strip_prefix('=')?;
        Some((&line[..end + 2], value))
    } else {
        line.split_once('=')
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// Machine state from `showvminfo --machinereadable`.
#[must_use]
pub fn parse_state(output: &str) -> VmState {
    let mut state = None;
    for (key, value) in pairs(output) {
        match key {
            "name" if value == INACCESSIBLE_NAME => return VmState::Inaccessible,
            "VMState" if state.is_none() => state = Some(VmState::from_raw(value)),
            _ => {}
        }
    }
    state.unwrap_or(VmState::Inaccessible)
}

/// SCSI controller slots reporting no medium, in output order.
#[must_use]
pub fn empty_scsi_slots(output: &str) -> Vec<PortDevice> {
    pairs(output)
        .filter(|(_, value)| *value == "none")
        .filter_map(|(key, _)| {
            let rest = key.strip_prefix(SCSI_CONTROLLER)?.strip_prefix('-')?;
            let (port, device) = rest.split_once('-')?;
            Some(PortDevice::new(port.parse().ok()?, device.parse().ok()?))
        })
        .collect()
}

/// MAC addresses keyed by 1-based NIC index.
#[must_use]
pub fn parse_macs(output: &str) -> BTreeMap<usize, String> {
    pairs(output)
        .filter_map(|(key, value)| {
            let nic = key.strip_prefix("macaddress")?.parse().ok()?;
            (!value.is_empty()).then(|| (nic, value.to_owned()))
        })
        .collect()
}

/// Name from an `import` line like `Suggested VM name "sc-base"`.
#[must_use]
pub fn suggested_vm_name(output: &str) -> Option<&str> {
    const MARKER: &str = "Suggested VM name \"";
    let start = output.find(MARKER)? + MARKER.len();
    let len = output[start..].find('"')?;
    (len > 0).then(|| &output[start..start + len])
}

/// UUID of `name` in `list vms` output (`"name" {uuid}` per line).
#[must_use]
pub fn listed_vm_id<'a>(output: &'a str, name: &str) -> Option<&'a str> {
    output.lines().find_map(|line| {
        let rest = line.trim_end().strip_prefix('"')?.strip_prefix(name)?;
        let uuid = rest.strip_prefix("\" {")?.strip_suffix('}')?;
        (!uuid.is_empty()).then_some(uuid)
    })
}

/// Whether `startvm` output confirms the machine started.
#[must_use]
pub fn start_succeeded(output: &str) -> bool {
    output.lines().any(|line| {
        line.find("VM \"")
            .is_some_and(|i| line[i + 4..].contains("\" has been successfully started"))
    })
}
