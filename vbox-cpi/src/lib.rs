//! VirtualBox cloud provider interface.
//!
//! Translates lifecycle calls (stemcells, machines, disks) into hypervisor
//! commands and keeps durable per-resource state in a filesystem registry on
//! the hypervisor host.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod actions;
pub mod cpi;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod registry;

pub use cpi::Cpi;
pub use dispatch::{dispatch, parse_request, Request, Response, ResponseError};
pub use error::CpiError;
pub use options::{CpiOptions, RetryOptions};
pub use registry::{DiskRegistry, Registry, StemcellRegistry, VmRegistry};
