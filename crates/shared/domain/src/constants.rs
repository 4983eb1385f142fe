//! Domain-level constants.
//!
//! These constants define business rules and validation requirements.

// =============================================================================
// Entities
// =============================================================================

/// Logical name of the user entity
pub const USER_ENTITY: &str = "User";

/// Logical name of the post entity
pub const POST_ENTITY: &str = "Post";

/// Identity field shared by every entity
pub const ID_FIELD: &str = "id";

/// Soft delete marker field
pub const DELETED_AT_FIELD: &str = "deleted_at";

// =============================================================================
// Pagination
// =============================================================================

/// Default number of items per page
pub const DEFAULT_PAGE_LIMIT: u64 = 20;

/// Default starting page number (1-indexed)
pub const DEFAULT_PAGE_NUMBER: u64 = 1;
