//! Domain types for the VirtualBox lifecycle driver.
//!
//! Defines resource identifiers, network options, disk attachment records
//! and the agent environment handed to guests, along with the disc image
//! writer used to deliver it.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod agent_env;
pub mod attachment;
pub mod error;
pub mod id;
pub mod iso9660;
pub mod network;

pub use agent_env::{AgentEnv, DiskMap, NetworkSettings};
pub use attachment::{DiskAttachment, DiskType, PortDevice};
pub use error::CoreError;
pub use id::{DiskId, ResourceId, StemcellId, VmId};
pub use network::{NetworkOption, NetworkSpec, NetworkType};
