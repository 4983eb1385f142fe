//! Domain layer - Core business entities and value objects.
//!
//! This crate contains pure domain logic with no infrastructure dependencies.
//! Entities here are what the repository layer stores and returns.

pub mod constants;
pub mod entity;
pub mod error;
pub mod post;
pub mod user;

pub use constants::*;
pub use entity::{Entity, SoftDeletable};
pub use error::DomainError;
pub use post::{CreatePost, Post, UpdatePost};
pub use user::{CreateUser, UpdateUser, User};
