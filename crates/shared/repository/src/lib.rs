//! ORM-agnostic data access layer.
//!
//! Repositories are written against the [`DatabaseDelegate`] contract only.
//! The [`AdapterFactory`] decides which store technology backs a named
//! entity, so swapping SeaORM for the in-memory store is a wiring change.

pub mod adapters;
mod base;
mod delegate;
mod factory;
mod include;
pub mod query;
mod soft_delete;
mod transactional;

pub use adapters::{IdStrategy, MemoryStore, SeaOrmDelegate, SeaOrmStore, TableSchema};
pub use base::BaseRepository;
pub use delegate::DatabaseDelegate;
pub use factory::{
    canonical_name, AdapterFactory, Backend, Relation, RelationKind, Store, StoreTransaction,
    TransactionScope,
};
pub use query::{
    BatchCount, Filter, FindArgs, Include, IncludeSpec, OrderBy, PaginatedResult, QueryOptions,
    Record, Selection, SortOrder,
};
pub use soft_delete::SoftDeleteRepository;
pub use transactional::{TransactionFuture, TransactionalRepository};
