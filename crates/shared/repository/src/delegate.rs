//! Database delegate contract.
//!
//! The minimal operation set a store binding must offer for one entity.
//! Everything above this trait is written against records and filters
//! only, never against a particular ORM.

use async_trait::async_trait;

use common::AppResult;

use crate::query::{BatchCount, Filter, FindArgs, Record, Selection};

/// Operations one named entity's store supports.
///
/// Failures are reported, never swallowed: write conflicts surface as
/// `AppError::ConstraintViolation`, missing rows for `update`/`delete` as
/// `AppError::NotFound`. Implementations pass through any deadline their
/// store client supports and add no retries of their own.
#[async_trait]
pub trait DatabaseDelegate: Send + Sync {
    /// Look up the record identified by `filter`.
    ///
    /// `filter` must identify at most one record; with a non-unique
    /// filter the bundled adapters return the first match.
    async fn find_unique(
        &self,
        filter: &Filter,
        select: Option<&Selection>,
    ) -> AppResult<Option<Record>>;

    /// First record matching the arguments, in the requested or natural order
    async fn find_first(&self, args: &FindArgs) -> AppResult<Option<Record>>;

    /// All records matching the arguments (possibly none)
    async fn find_many(&self, args: &FindArgs) -> AppResult<Vec<Record>>;

    /// Number of records matching `filter` (all records when `None`)
    async fn count(&self, filter: Option<&Filter>) -> AppResult<u64>;

    /// Insert one record and return it with generated fields populated
    async fn create(&self, data: Record) -> AppResult<Record>;

    /// Insert all records or none of them
    async fn create_many(&self, data: Vec<Record>) -> AppResult<BatchCount>;

    /// Apply `data` to the record matching `filter`
    async fn update(&self, filter: &Filter, data: Record) -> AppResult<Record>;

    /// Apply `data` to every matching record; zero matches is not an error
    async fn update_many(&self, filter: &Filter, data: Record) -> AppResult<BatchCount>;

    /// Update the record matching `filter`, or create one when none does,
    /// as a single atomic step
    async fn upsert(&self, filter: &Filter, create: Record, update: Record)
        -> AppResult<Record>;

    /// Remove the record matching `filter` and return its last state
    async fn delete(&self, filter: &Filter) -> AppResult<Record>;

    /// Remove every matching record
    async fn delete_many(&self, filter: &Filter) -> AppResult<BatchCount>;
}
