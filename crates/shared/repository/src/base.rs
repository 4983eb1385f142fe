//! Generic entity repository.
//!
//! One repository per entity type, written only against the
//! [`DatabaseDelegate`] contract. Entities, create payloads and update
//! payloads cross the store boundary as records via serde.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use common::{AppError, AppResult};
use domain::{Entity, DEFAULT_PAGE_LIMIT, DEFAULT_PAGE_NUMBER, ID_FIELD};

use crate::delegate::DatabaseDelegate;
use crate::factory::AdapterFactory;
use crate::query::{
    BatchCount, Filter, FindArgs, PaginatedResult, QueryOptions, Record, Selection,
};

/// CRUD, query and pagination over one entity.
///
/// `T` is the entity, `C` the create payload and `U` the update payload.
/// The delegate is resolved from the factory on first use and kept for
/// the lifetime of the repository.
pub struct BaseRepository<T, C, U> {
    entity_name: String,
    default_limit: u64,
    factory: AdapterFactory,
    delegate: OnceCell<Arc<dyn DatabaseDelegate>>,
    _marker: PhantomData<fn() -> (T, C, U)>,
}

impl<T, C, U> BaseRepository<T, C, U>
where
    T: Entity,
    C: Serialize + Send + Sync,
    U: Serialize + Send + Sync,
{
    /// Repository for `T::NAME` with the default page size
    pub fn new(factory: AdapterFactory) -> Self {
        Self::with_config(factory, T::NAME, DEFAULT_PAGE_LIMIT)
    }

    pub fn with_config(
        factory: AdapterFactory,
        entity_name: impl Into<String>,
        default_limit: u64,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            default_limit,
            factory,
            delegate: OnceCell::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_default_limit(mut self, default_limit: u64) -> Self {
        self.default_limit = default_limit;
        self
    }

    /// Fresh repository with the same configuration on another factory
    pub fn bound_to(&self, factory: AdapterFactory) -> Self {
        Self::with_config(factory, self.entity_name.clone(), self.default_limit)
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn default_limit(&self) -> u64 {
        self.default_limit
    }

    pub fn factory(&self) -> &AdapterFactory {
        &self.factory
    }

    /// Delegate for this entity, resolved once
    pub(crate) async fn delegate(&self) -> AppResult<&Arc<dyn DatabaseDelegate>> {
        self.delegate
            .get_or_try_init(|| async { self.factory.create_adapter(&self.entity_name) })
            .await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn find_by_id(&self, id: T::Id) -> AppResult<Option<T>> {
        let filter = id_filter::<T>(&id)?;
        let found = self.delegate().await?.find_unique(&filter, None).await?;
        found.map(into_entity).transpose()
    }

    /// First entity matching `filter`
    pub async fn find_one(&self, filter: Filter) -> AppResult<Option<T>> {
        let found = self
            .delegate()
            .await?
            .find_first(&FindArgs::filtered(filter))
            .await?;
        found.map(into_entity).transpose()
    }

    /// Entities matching `options`, or every entity when `None`
    pub async fn find_all(&self, options: Option<QueryOptions>) -> AppResult<Vec<T>> {
        let args = self.build_query_args(options.as_ref())?;
        self.fetch(&args).await
    }

    /// Every entity matching `filter`
    pub async fn find_many(&self, filter: Filter) -> AppResult<Vec<T>> {
        self.fetch(&FindArgs::filtered(filter)).await
    }

    pub async fn find_many_with_options(&self, options: QueryOptions) -> AppResult<Vec<T>> {
        let args = self.build_query_args(Some(&options))?;
        self.fetch(&args).await
    }

    /// Raw records, for projections that do not deserialize into `T`
    pub async fn find_projected(&self, options: QueryOptions) -> AppResult<Vec<Record>> {
        let args = self.build_query_args(Some(&options))?;
        self.delegate().await?.find_many(&args).await
    }

    /// One page of entities plus the total match count.
    ///
    /// `page` defaults to 1 and `limit` to the repository default; zero for
    /// either is rejected. An explicit `take` is capped at `limit`. The
    /// page and the count are read concurrently without a snapshot, so a
    /// write landing between them can make them disagree.
    pub async fn find_all_paginated(&self, options: QueryOptions) -> AppResult<PaginatedResult<T>> {
        let page = options.page.unwrap_or(DEFAULT_PAGE_NUMBER);
        let limit = options.limit.unwrap_or(self.default_limit);

        if page == 0 {
            return Err(AppError::validation("page must be at least 1"));
        }
        if limit == 0 {
            return Err(AppError::validation("limit must be greater than zero"));
        }

        let take = options.take.map(|take| take.min(limit));
        let mut args = QueryOptions {
            page: Some(page),
            limit: Some(limit),
            take,
            ..options
        }
        .to_find_args()?;
        if args.take.is_none() {
            args.take = Some(limit);
        }

        let delegate = self.delegate().await?;
        let (records, total) = tokio::try_join!(
            delegate.find_many(&args),
            delegate.count(args.filter.as_ref())
        )?;

        tracing::debug!(
            entity = %self.entity_name,
            page,
            limit,
            total,
            returned = records.len(),
            "paginated query"
        );

        let data = records
            .into_iter()
            .map(into_entity)
            .collect::<AppResult<Vec<T>>>()?;
        Ok(PaginatedResult::new(data, total, page, limit))
    }

    pub async fn count(&self, filter: Option<Filter>) -> AppResult<u64> {
        self.delegate().await?.count(filter.as_ref()).await
    }

    pub async fn exists(&self, id: T::Id) -> AppResult<bool> {
        self.exists_by(id_filter::<T>(&id)?).await
    }

    /// True when a record matches `filter`, which should identify one record
    pub async fn exists_by(&self, filter: Filter) -> AppResult<bool> {
        let select = Selection::fields([ID_FIELD]);
        let found = self
            .delegate()
            .await?
            .find_unique(&filter, Some(&select))
            .await?;
        Ok(found.is_some())
    }

    /// Re-read an entity by its own identity
    pub async fn refresh(&self, entity: &T) -> AppResult<Option<T>> {
        self.find_by_id(entity.id()).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn create(&self, data: C) -> AppResult<T> {
        let record = to_record(&data)?;
        let created = self.delegate().await?.create(record).await?;
        tracing::debug!(entity = %self.entity_name, "created record");
        into_entity(created)
    }

    /// Insert all payloads or none of them
    pub async fn create_many(&self, data: Vec<C>) -> AppResult<BatchCount> {
        let records = data
            .iter()
            .map(to_record)
            .collect::<AppResult<Vec<Record>>>()?;
        let size = records.len();
        let result = self.delegate().await?.create_many(records).await?;
        tracing::debug!(entity = %self.entity_name, size, count = result.count, "created records");
        Ok(result)
    }

    /// Apply `data` to the entity with `id`; `NotFound` when there is none
    pub async fn update(&self, id: T::Id, data: U) -> AppResult<T> {
        let filter = id_filter::<T>(&id)?;
        let updated = self.delegate().await?.update(&filter, to_record(&data)?).await?;
        tracing::debug!(entity = %self.entity_name, id = ?id, "updated record");
        into_entity(updated)
    }

    pub async fn update_many(&self, filter: Filter, data: U) -> AppResult<BatchCount> {
        let result = self
            .delegate()
            .await?
            .update_many(&filter, to_record(&data)?)
            .await?;
        tracing::debug!(entity = %self.entity_name, count = result.count, "updated records");
        Ok(result)
    }

    /// Update the entity matching `filter`, or create it from `create`
    pub async fn upsert(&self, filter: Filter, create: C, update: U) -> AppResult<T> {
        let record = self
            .delegate()
            .await?
            .upsert(&filter, to_record(&create)?, to_record(&update)?)
            .await?;
        into_entity(record)
    }

    /// Remove the entity with `id`; `NotFound` when there is none
    pub async fn delete(&self, id: T::Id) -> AppResult<()> {
        let filter = id_filter::<T>(&id)?;
        self.delegate().await?.delete(&filter).await?;
        tracing::debug!(entity = %self.entity_name, id = ?id, "deleted record");
        Ok(())
    }

    pub async fn delete_many(&self, filter: Filter) -> AppResult<BatchCount> {
        let result = self.delegate().await?.delete_many(&filter).await?;
        tracing::debug!(entity = %self.entity_name, count = result.count, "deleted records");
        Ok(result)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Normalize caller options into delegate arguments.
    ///
    /// Only supplied keys are forwarded; zero `skip`/`take` are real values.
    pub(crate) fn build_query_args(&self, options: Option<&QueryOptions>) -> AppResult<FindArgs> {
        let Some(options) = options else {
            return Ok(FindArgs::default());
        };
        if options.limit == Some(0) {
            return Err(AppError::validation("limit must be greater than zero"));
        }
        options.to_find_args()
    }

    pub(crate) async fn fetch(&self, args: &FindArgs) -> AppResult<Vec<T>> {
        let records = self.delegate().await?.find_many(args).await?;
        tracing::debug!(entity = %self.entity_name, returned = records.len(), "query");
        records.into_iter().map(into_entity).collect()
    }
}

impl<T, C, U> fmt::Debug for BaseRepository<T, C, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseRepository")
            .field("entity_name", &self.entity_name)
            .field("default_limit", &self.default_limit)
            .field("factory", &self.factory)
            .finish()
    }
}

/// `{ id: <id> }`
pub(crate) fn id_filter<T: Entity>(id: &T::Id) -> AppResult<Filter> {
    Ok(Filter::new().eq(ID_FIELD, serde_json::to_value(id)?))
}

pub(crate) fn to_record<P: Serialize>(payload: &P) -> AppResult<Record> {
    match serde_json::to_value(payload)? {
        Value::Object(record) => Ok(record),
        other => Err(AppError::validation(format!(
            "payload must serialize to an object, got {other}"
        ))),
    }
}

pub(crate) fn into_entity<T: DeserializeOwned>(record: Record) -> AppResult<T> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryStore, TableSchema};
    use domain::{CreateUser, UpdateUser, User};

    fn repository() -> BaseRepository<User, CreateUser, UpdateUser> {
        let store = MemoryStore::new().table(TableSchema::new("User").unique("email"));
        BaseRepository::new(AdapterFactory::new(Arc::new(store)))
    }

    #[tokio::test]
    async fn test_paginated_query_rejects_zero_limit_and_page() {
        let repo = repository();

        let err = repo
            .find_all_paginated(QueryOptions::new().limit(0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = repo
            .find_all_paginated(QueryOptions::new().page(0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_find_all_rejects_zero_limit() {
        let err = repository()
            .find_all(Some(QueryOptions::new().limit(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_page_beyond_addressable_range_is_rejected() {
        let repo = repository();
        repo.create(CreateUser::new("a@x.com", None)).await.unwrap();

        let err = repo
            .find_all_paginated(QueryOptions::new().page(u64::MAX).limit(20))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "page out of range"));

        let err = repo
            .find_all(Some(QueryOptions::new().page(u64::MAX).limit(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_share_one_delegate() {
        let repo = repository();

        let (first, second) = tokio::join!(repo.delegate(), repo.delegate());
        assert!(Arc::ptr_eq(first.unwrap(), second.unwrap()));

        let (count, all) = tokio::join!(repo.count(None), repo.find_all(None));
        assert_eq!(count.unwrap(), 0);
        assert!(all.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_paginated_query_uses_default_limit() {
        let repo = repository().with_default_limit(2);
        for i in 0..3 {
            repo.create(CreateUser::new(format!("u{i}@x.com"), None))
                .await
                .unwrap();
        }

        let page = repo.find_all_paginated(QueryOptions::new()).await.unwrap();
        assert_eq!(page.limit, 2);
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
    }

    #[tokio::test]
    async fn test_explicit_take_is_capped_at_limit() {
        let repo = repository();
        for i in 0..4 {
            repo.create(CreateUser::new(format!("u{i}@x.com"), None))
                .await
                .unwrap();
        }

        let page = repo
            .find_all_paginated(QueryOptions::new().limit(2).take(10))
            .await
            .unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.total, 4);
    }

    #[tokio::test]
    async fn test_bound_repository_keeps_configuration() {
        let repo = repository().with_default_limit(7);
        let other = repo.bound_to(repo.factory().clone());
        assert_eq!(other.entity_name(), "User");
        assert_eq!(other.default_limit(), 7);
    }

    #[tokio::test]
    async fn test_exists_and_refresh() {
        let repo = repository();
        let user = repo.create(CreateUser::new("a@x.com", None)).await.unwrap();

        assert!(repo.exists(user.id).await.unwrap());
        assert!(!repo.exists(user.id + 100).await.unwrap());

        repo.update(
            user.id,
            UpdateUser {
                name: Some("Alice".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let refreshed = repo.refresh(&user).await.unwrap().unwrap();
        assert_eq!(refreshed.name.as_deref(), Some("Alice"));
    }
}
