//! Identifiers for hives, applications, and bees
//!
//! Explicit validation on construction; immutable after creation.

use crate::constants::{APP_NAME_LENGTH_BYTES_MAX, HIVE_ID_LENGTH_BYTES_MAX};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

fn valid_chars(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Unique identifier for a cluster process (one node)
///
/// Hive IDs should be stable across restarts for the same node, typically
/// derived from hostname or configured explicitly.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct HiveId(String);

impl HiveId {
    /// Create a new HiveId with validation
    ///
    /// # Errors
    /// Returns error if the id is empty, too long, or contains characters
    /// outside alphanumerics, dashes, underscores, and dots.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidId {
                id,
                reason: "hive ID cannot be empty".into(),
            });
        }

        if id.len() > HIVE_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidId {
                id: id.clone(),
                reason: format!(
                    "hive ID length {} exceeds limit {}",
                    id.len(),
                    HIVE_ID_LENGTH_BYTES_MAX
                ),
            });
        }

        if !valid_chars(&id) {
            return Err(Error::InvalidId {
                id,
                reason: "hive ID contains invalid characters".into(),
            });
        }

        Ok(Self(id))
    }

    /// Create a HiveId without validation (for internal use)
    #[doc(hidden)]
    pub fn new_unchecked(id: String) -> Self {
        debug_assert!(!id.is_empty());
        debug_assert!(id.len() <= HIVE_ID_LENGTH_BYTES_MAX);
        Self(id)
    }

    /// Get the hive ID as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for HiveId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name of an application running on the cluster
///
/// One queen exists per (hive, app); colony namespaces are scoped by app.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AppName(String);

impl AppName {
    /// Create a new AppName with validation
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(Error::InvalidId {
                id: name,
                reason: "app name cannot be empty".into(),
            });
        }

        if name.len() > APP_NAME_LENGTH_BYTES_MAX {
            return Err(Error::InvalidId {
                id: name.clone(),
                reason: format!(
                    "app name length {} exceeds limit {}",
                    name.len(),
                    APP_NAME_LENGTH_BYTES_MAX
                ),
            });
        }

        if !valid_chars(&name) {
            return Err(Error::InvalidId {
                id: name,
                reason: "app name contains invalid characters".into(),
            });
        }

        Ok(Self(name))
    }

    /// Get the app name as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AppName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Globally unique identifier for a bee
///
/// Stable for the bee's lifetime; equality by tuple value. The `seq`
/// component is allocated by the owning queen and is dense per (hive, app).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BeeId {
    /// The hive the bee runs on
    pub hive: HiveId,
    /// The application the bee belongs to
    pub app: AppName,
    /// Queen-allocated sequence number, dense per (hive, app)
    pub seq: u64,
    /// Whether the bee is detached (manually driven, not bound to cells)
    pub detached: bool,
}

impl BeeId {
    /// Create a new bee ID
    pub fn new(hive: HiveId, app: AppName, seq: u64, detached: bool) -> Self {
        Self {
            hive,
            app,
            seq,
            detached,
        }
    }
}

impl fmt::Display for BeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detached {
            write!(f, "{}/{}/{}d", self.hive, self.app, self.seq)
        } else {
            write!(f, "{}/{}/{}", self.hive, self.app, self.seq)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hive_id_valid() {
        let id = HiveId::new("hive-1").unwrap();
        assert_eq!(id.as_str(), "hive-1");
        assert_eq!(format!("{}", id), "hive-1");
    }

    #[test]
    fn test_hive_id_invalid_empty() {
        assert!(matches!(HiveId::new(""), Err(Error::InvalidId { .. })));
    }

    #[test]
    fn test_hive_id_invalid_chars() {
        assert!(matches!(HiveId::new("hive/1"), Err(Error::InvalidId { .. })));
    }

    #[test]
    fn test_hive_id_too_long() {
        let long = "a".repeat(HIVE_ID_LENGTH_BYTES_MAX + 1);
        assert!(matches!(HiveId::new(long), Err(Error::InvalidId { .. })));
    }

    #[test]
    fn test_app_name_valid() {
        let name = AppName::new("key-value").unwrap();
        assert_eq!(name.as_str(), "key-value");
    }

    #[test]
    fn test_bee_id_equality() {
        let hive = HiveId::new("hive-1").unwrap();
        let app = AppName::new("kv").unwrap();
        let a = BeeId::new(hive.clone(), app.clone(), 1, false);
        let b = BeeId::new(hive.clone(), app.clone(), 1, false);
        let c = BeeId::new(hive, app, 2, false);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_bee_id_display() {
        let hive = HiveId::new("h1").unwrap();
        let app = AppName::new("kv").unwrap();
        let id = BeeId::new(hive.clone(), app.clone(), 7, false);
        assert_eq!(format!("{}", id), "h1/kv/7");
        let det = BeeId::new(hive, app, 8, true);
        assert_eq!(format!("{}", det), "h1/kv/8d");
    }
}
