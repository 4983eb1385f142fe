//! Infrastructure layer - database, store wiring and the unit of work.

mod db;
pub mod migrations;
mod store;
mod unit_of_work;

pub use db::Database;
pub use migrations::Migrator;
pub use store::{build_factory, memory_factory, sea_orm_factory, AdapterShortcuts};
pub use unit_of_work::{Persistence, TransactionContext, UnitOfWork};
