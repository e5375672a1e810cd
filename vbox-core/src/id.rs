use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An identifier handed out by the resource registry.
///
/// Identifiers are generated client-side from a random UUID, optionally
/// namespaced by a prefix, and are never reused.
pub trait ResourceId: fmt::Display + AsRef<str> + Clone + Send + Sync {
    /// Namespace prefix joined to the UUID with `-`, if any.
    const PREFIX: Option<&'static str>;

    /// Wraps an existing identifier string.
    fn from_string(id: String) -> Self;

    /// Generates a fresh identifier.
    #[must_use]
    fn generate() -> Self {
        let uuid = Uuid::new_v4();
        match Self::PREFIX {
            Some(prefix) => Self::from_string(format!("{prefix}-{uuid}")),
            None => Self::from_string(uuid.to_string()),
        }
    }
}

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ResourceId for $name {
            const PREFIX: Option<&'static str> = $prefix;

            fn from_string(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

resource_id!(
    /// Identifies an imported machine image (`sc-<uuid>`).
    StemcellId,
    Some("sc")
);

resource_id!(
    /// Identifies a persistent or ephemeral disk (`disk-<uuid>`).
    DiskId,
    Some("disk")
);

resource_id!(
    /// Identifies a virtual machine. This is the hypervisor-assigned UUID.
    VmId,
    None
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stemcell_ids_carry_prefix() {
        let id = StemcellId::generate();
        assert!(id.as_str().starts_with("sc-"), "got {id}");
        assert_eq!(id.as_str().len(), "sc-".len() + 36);
    }

    #[test]
    fn disk_ids_carry_prefix() {
        let id = DiskId::generate();
        assert!(id.as_str().starts_with("disk-"), "got {id}");
    }

    #[test]
    fn vm_ids_are_bare_uuids() {
        let id = VmId::generate();
        assert!(Uuid::parse_str(id.as_str()).is_ok(), "vm id must be a plain uuid: {id}");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(DiskId::generate(), DiskId::generate());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = DiskId::new("disk-123");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"disk-123\"");
    }
}
