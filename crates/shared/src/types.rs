//! Common identifier, timestamp, and metadata types used across the
//! engine's crates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Unique identifier for engine-managed objects (entities, pools, groups).
pub type EntityId = Uuid;

/// Host-monotonic timestamp.
pub type Timestamp = DateTime<Utc>;

/// Monotonically increasing version counter used for optimistic
/// concurrency and cache-key generation.
pub type Version = u64;

/// Base trait for anything with engine-managed identity/versioning.
pub trait Versioned {
    /// Unique identifier.
    fn id(&self) -> EntityId;

    /// Current version.
    fn version(&self) -> Version;

    /// Creation timestamp.
    fn created_at(&self) -> Timestamp;

    /// Last-update timestamp.
    fn updated_at(&self) -> Timestamp;
}

/// Standalone identity/versioning metadata, usable by types that don't want
/// to carry their own id/version/timestamp fields directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Unique identifier.
    pub id: EntityId,
    /// Version for optimistic concurrency control.
    pub version: Version,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last update timestamp.
    pub updated_at: Timestamp,
    /// Free-form tags.
    pub tags: std::collections::HashMap<String, String>,
}

impl EntityMetadata {
    /// Create fresh metadata with a new id and version 1.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tags: std::collections::HashMap::new(),
        }
    }

    /// Bump the version and refresh the update timestamp.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

impl Default for EntityMetadata {
    fn default() -> Self {
        Self::new()
    }
}
