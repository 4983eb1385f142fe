//! Soft delete capability.
//!
//! Separate from the base operations: only repositories whose entity
//! carries a `deleted_at` marker implement it.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use common::{AppError, AppResult, OptionExt};
use domain::{SoftDeletable, DELETED_AT_FIELD};

use crate::base::{id_filter, into_entity, BaseRepository};
use crate::query::{FindArgs, QueryOptions, Record};
use crate::transactional::TransactionalRepository;

#[async_trait]
pub trait SoftDeleteRepository<T: SoftDeletable>: Send + Sync {
    /// Mark an active entity deleted; `NotFound` if it is missing or
    /// already deleted
    async fn soft_delete(&self, id: T::Id) -> AppResult<T>;

    /// Clear the deleted marker; fails with `Validation` when the entity
    /// is not deleted
    async fn restore(&self, id: T::Id) -> AppResult<T>;

    /// Entities matching `options` that are not deleted
    async fn find_active(&self, options: QueryOptions) -> AppResult<Vec<T>>;

    /// Entities matching `options` that are deleted
    async fn find_deleted(&self, options: QueryOptions) -> AppResult<Vec<T>>;
}

#[async_trait]
impl<T, C, U> SoftDeleteRepository<T> for BaseRepository<T, C, U>
where
    T: SoftDeletable,
    C: Serialize + Send + Sync,
    U: Serialize + Send + Sync,
{
    async fn soft_delete(&self, id: T::Id) -> AppResult<T> {
        let filter = id_filter::<T>(&id)?.eq(DELETED_AT_FIELD, Value::Null);
        let mut data = Record::new();
        data.insert(
            DELETED_AT_FIELD.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        let record = self.delegate().await?.update(&filter, data).await?;
        tracing::info!(entity = %self.entity_name(), id = ?id, "soft deleted");
        into_entity(record)
    }

    async fn restore(&self, id: T::Id) -> AppResult<T> {
        let current = self.find_by_id(id.clone()).await?.ok_or_not_found()?;
        if !current.is_deleted() {
            return Err(AppError::validation(format!(
                "{} is not deleted",
                self.entity_name()
            )));
        }

        let mut data = Record::new();
        data.insert(DELETED_AT_FIELD.to_string(), Value::Null);
        let record = self
            .delegate()
            .await?
            .update(&id_filter::<T>(&id)?, data)
            .await?;
        tracing::info!(entity = %self.entity_name(), id = ?id, "restored");
        into_entity(record)
    }

    async fn find_active(&self, options: QueryOptions) -> AppResult<Vec<T>> {
        let options = options.where_eq(DELETED_AT_FIELD, Value::Null);
        self.find_many_with_options(options).await
    }

    async fn find_deleted(&self, options: QueryOptions) -> AppResult<Vec<T>> {
        // Filters are equality-only, so "not null" is applied after the read
        // and the window after that.
        let window = self.build_query_args(Some(&options))?;
        let args = FindArgs {
            skip: None,
            take: None,
            ..window.clone()
        };

        let deleted = self
            .fetch(&args)
            .await?
            .into_iter()
            .filter(|entity| entity.is_deleted())
            .skip(window.skip.unwrap_or(0) as usize);

        Ok(match window.take {
            Some(take) => deleted.take(take as usize).collect(),
            None => deleted.collect(),
        })
    }
}

#[async_trait]
impl<T, C, U> SoftDeleteRepository<T> for TransactionalRepository<T, C, U>
where
    T: SoftDeletable,
    C: Serialize + Send + Sync,
    U: Serialize + Send + Sync,
{
    async fn soft_delete(&self, id: T::Id) -> AppResult<T> {
        (**self).soft_delete(id).await
    }

    async fn restore(&self, id: T::Id) -> AppResult<T> {
        (**self).restore(id).await
    }

    async fn find_active(&self, options: QueryOptions) -> AppResult<Vec<T>> {
        (**self).find_active(options).await
    }

    async fn find_deleted(&self, options: QueryOptions) -> AppResult<Vec<T>> {
        (**self).find_deleted(options).await
    }
}
