//! Repository layer for data access.

pub mod entities;
mod user_repository;

use domain::{CreatePost, Post, UpdatePost};
use repository::TransactionalRepository;

pub use user_repository::{UserRepository, UserStore};

#[cfg(any(test, feature = "test-utils"))]
pub use user_repository::MockUserRepository;

/// Posts need nothing beyond the generic repository surface
pub type PostRepository = TransactionalRepository<Post, CreatePost, UpdatePost>;
