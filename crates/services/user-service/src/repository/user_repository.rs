//! User repository with soft delete support.

use async_trait::async_trait;
use serde_json::Value;

use common::{AppResult, OptionExt};
use domain::{CreateUser, UpdateUser, User, DEFAULT_PAGE_LIMIT, DELETED_AT_FIELD, ID_FIELD};
use repository::{
    AdapterFactory, Filter, PaginatedResult, QueryOptions, SoftDeleteRepository,
    TransactionalRepository,
};

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// User repository trait for dependency injection.
///
/// By default, all query methods exclude soft-deleted records.
/// Use `*_with_deleted` variants to include them.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find active user by ID (excludes soft-deleted)
    async fn find_by_id(&self, id: i32) -> AppResult<Option<User>>;

    /// Find user by ID including soft-deleted
    async fn find_by_id_with_deleted(&self, id: i32) -> AppResult<Option<User>>;

    /// Find active user by email address (excludes soft-deleted)
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;

    /// Find user by email including soft-deleted
    async fn find_by_email_with_deleted(&self, email: &str) -> AppResult<Option<User>>;

    /// Create a new user
    async fn create(&self, data: CreateUser) -> AppResult<User>;

    /// Update an active user
    async fn update(&self, id: i32, data: UpdateUser) -> AppResult<User>;

    /// One page of active users
    async fn list(&self, options: QueryOptions) -> AppResult<PaginatedResult<User>>;

    /// Soft-deleted users only
    async fn list_deleted(&self, options: QueryOptions) -> AppResult<Vec<User>>;

    /// Number of active users
    async fn count(&self) -> AppResult<u64>;

    /// Permanently delete user from the store (hard delete)
    async fn delete(&self, id: i32) -> AppResult<()>;

    /// Soft delete user by ID (sets deleted_at timestamp)
    async fn soft_delete(&self, id: i32) -> AppResult<User>;

    /// Restore a soft-deleted user
    async fn restore(&self, id: i32) -> AppResult<User>;
}

/// [`UserRepository`] over the generic transactional repository.
pub struct UserStore {
    repo: TransactionalRepository<User, CreateUser, UpdateUser>,
}

impl UserStore {
    pub fn new(factory: AdapterFactory) -> Self {
        Self::with_default_limit(factory, DEFAULT_PAGE_LIMIT)
    }

    pub fn with_default_limit(factory: AdapterFactory, default_limit: u64) -> Self {
        Self {
            repo: TransactionalRepository::new(factory).with_default_limit(default_limit),
        }
    }

    /// The underlying generic repository, for queries this trait does not cover
    pub fn repository(&self) -> &TransactionalRepository<User, CreateUser, UpdateUser> {
        &self.repo
    }
}

fn active(filter: Filter) -> Filter {
    filter.eq(DELETED_AT_FIELD, Value::Null)
}

fn by_email(email: &str) -> Filter {
    Filter::new().eq("email", email)
}

#[async_trait]
impl UserRepository for UserStore {
    async fn find_by_id(&self, id: i32) -> AppResult<Option<User>> {
        self.repo
            .find_one(active(Filter::new().eq(ID_FIELD, id)))
            .await
    }

    async fn find_by_id_with_deleted(&self, id: i32) -> AppResult<Option<User>> {
        self.repo.find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.repo.find_one(active(by_email(email))).await
    }

    async fn find_by_email_with_deleted(&self, email: &str) -> AppResult<Option<User>> {
        self.repo.find_one(by_email(email)).await
    }

    async fn create(&self, data: CreateUser) -> AppResult<User> {
        self.repo.create(data).await
    }

    async fn update(&self, id: i32, data: UpdateUser) -> AppResult<User> {
        self.find_by_id(id).await?.ok_or_not_found()?;
        self.repo.update(id, data).await
    }

    async fn list(&self, options: QueryOptions) -> AppResult<PaginatedResult<User>> {
        self.repo
            .find_all_paginated(options.where_eq(DELETED_AT_FIELD, Value::Null))
            .await
    }

    async fn list_deleted(&self, options: QueryOptions) -> AppResult<Vec<User>> {
        self.repo.find_deleted(options).await
    }

    async fn count(&self) -> AppResult<u64> {
        self.repo.count(Some(active(Filter::new()))).await
    }

    async fn delete(&self, id: i32) -> AppResult<()> {
        self.repo.delete(id).await
    }

    async fn soft_delete(&self, id: i32) -> AppResult<User> {
        self.repo.soft_delete(id).await
    }

    async fn restore(&self, id: i32) -> AppResult<User> {
        self.repo.restore(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory_factory;
    use common::AppError;

    fn store() -> UserStore {
        UserStore::new(memory_factory())
    }

    #[tokio::test]
    async fn test_soft_deleted_user_is_hidden() {
        let store = store();
        let user = store.create(CreateUser::new("a@x.com", None)).await.unwrap();

        store.soft_delete(user.id).await.unwrap();

        assert_eq!(store.find_by_id(user.id).await.unwrap(), None);
        assert_eq!(store.find_by_email("a@x.com").await.unwrap(), None);
        assert!(store.find_by_id_with_deleted(user.id).await.unwrap().is_some());
        assert!(store.find_by_email_with_deleted("a@x.com").await.unwrap().is_some());
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.list_deleted(QueryOptions::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_of_deleted_user_is_not_found() {
        let store = store();
        let user = store.create(CreateUser::new("a@x.com", None)).await.unwrap();
        store.soft_delete(user.id).await.unwrap();

        let result = store
            .update(
                user.id,
                UpdateUser {
                    name: Some("A".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_list_pages_active_users() {
        let store = store();
        for i in 0..3 {
            store
                .create(CreateUser::new(format!("u{i}@x.com"), None))
                .await
                .unwrap();
        }
        let gone = store.create(CreateUser::new("gone@x.com", None)).await.unwrap();
        store.soft_delete(gone.id).await.unwrap();

        let page = store
            .list(QueryOptions::new().page(1).limit(2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.data.len(), 2);
        assert!(page.has_next);
    }
}
