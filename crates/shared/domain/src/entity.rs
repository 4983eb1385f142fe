//! Entity contract shared by the domain and the repository layer.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// A named record type with a scalar identity field called `id`.
///
/// Everything besides the identity is opaque to the repository layer,
/// which only moves entities in and out of the store through serde.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical entity name used to resolve the store binding
    const NAME: &'static str;

    /// Identity value type (numeric or string)
    type Id: Serialize + Clone + Debug + Send + Sync + 'static;

    /// Identity of this record
    fn id(&self) -> Self::Id;
}

/// Entities carrying a `deleted_at` soft delete marker.
pub trait SoftDeletable: Entity {
    /// Soft delete timestamp (None = active)
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    /// Check if the record is soft deleted
    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}
