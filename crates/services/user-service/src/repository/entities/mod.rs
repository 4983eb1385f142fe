//! SeaORM entities backing the `User` and `Post` bindings.

pub mod post;
pub mod user;
