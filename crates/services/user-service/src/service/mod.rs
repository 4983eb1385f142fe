//! Service layer - user use cases over the repository.

mod user_service;

pub use user_service::{UserManager, UserService};
