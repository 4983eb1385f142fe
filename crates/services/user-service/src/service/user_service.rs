//! User service - Handles user-related business logic.
//!
//! The only layer that turns store failures into caller-facing errors:
//! a uniqueness violation on `email` surfaces as `Conflict("Email")`.

use async_trait::async_trait;
use std::sync::Arc;
use validator::Validate;

use common::{AppError, AppResult, OptionExt};
use domain::{CreateUser, DomainError, UpdateUser, User};
use repository::{PaginatedResult, QueryOptions};

use crate::repository::UserRepository;

/// User service trait for dependency injection.
///
/// By default, operations exclude soft-deleted users.
#[async_trait]
pub trait UserService: Send + Sync {
    /// Get active user by ID
    async fn get_user(&self, id: i32) -> AppResult<User>;

    /// Get active user by email
    async fn get_user_by_email(&self, email: &str) -> AppResult<User>;

    /// One page of active users
    async fn list_users(&self, options: QueryOptions) -> AppResult<PaginatedResult<User>>;

    /// Only soft-deleted users
    async fn list_deleted_users(&self, options: QueryOptions) -> AppResult<Vec<User>>;

    /// Create a new user; the email must be unused, deleted users included
    async fn create_user(&self, data: CreateUser) -> AppResult<User>;

    /// Update user details (only active users)
    async fn update_user(&self, id: i32, data: UpdateUser) -> AppResult<User>;

    /// Soft delete user (sets deleted_at timestamp)
    async fn delete_user(&self, id: i32) -> AppResult<()>;

    /// Permanently delete user from the store
    async fn hard_delete_user(&self, id: i32) -> AppResult<()>;

    /// Restore a soft-deleted user
    async fn restore_user(&self, id: i32) -> AppResult<User>;
}

/// Concrete implementation of UserService using repository.
pub struct UserManager {
    repo: Arc<dyn UserRepository>,
}

impl UserManager {
    /// Create new user service instance with repository
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }
}

/// Map a store-level uniqueness failure on `email` to the domain conflict
fn email_conflict(err: AppError) -> AppError {
    match err {
        AppError::ConstraintViolation(ref msg) if msg.to_lowercase().contains("email") => {
            AppError::conflict("Email")
        }
        other => other,
    }
}

#[async_trait]
impl UserService for UserManager {
    async fn get_user(&self, id: i32) -> AppResult<User> {
        self.repo.find_by_id(id).await?.ok_or_not_found()
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<User> {
        self.repo.find_by_email(email).await?.ok_or_not_found()
    }

    async fn list_users(&self, options: QueryOptions) -> AppResult<PaginatedResult<User>> {
        self.repo.list(options).await
    }

    async fn list_deleted_users(&self, options: QueryOptions) -> AppResult<Vec<User>> {
        self.repo.list_deleted(options).await
    }

    async fn create_user(&self, data: CreateUser) -> AppResult<User> {
        data.validate().map_err(DomainError::from)?;

        // Check if email already exists
        if self
            .repo
            .find_by_email_with_deleted(&data.email)
            .await?
            .is_some()
        {
            return Err(AppError::conflict("Email"));
        }

        // A concurrent insert can still win the race; the store catches it
        let user = self.repo.create(data).await.map_err(email_conflict)?;
        tracing::info!(user_id = user.id, "user created");
        Ok(user)
    }

    async fn update_user(&self, id: i32, data: UpdateUser) -> AppResult<User> {
        data.validate().map_err(DomainError::from)?;
        self.repo.update(id, data).await.map_err(email_conflict)
    }

    async fn delete_user(&self, id: i32) -> AppResult<()> {
        self.repo.soft_delete(id).await?;
        tracing::info!(user_id = id, "user deleted");
        Ok(())
    }

    async fn hard_delete_user(&self, id: i32) -> AppResult<()> {
        self.repo.delete(id).await
    }

    async fn restore_user(&self, id: i32) -> AppResult<User> {
        self.repo.restore(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockUserRepository;
    use mockall::predicate::eq;

    fn user(id: i32, email: &str) -> User {
        User {
            id,
            email: email.to_string(),
            name: None,
            deleted_at: None,
            posts: None,
        }
    }

    #[tokio::test]
    async fn test_get_user_success() {
        let mut repo = MockUserRepository::new();
        repo.expect_find_by_id()
            .with(eq(7))
            .returning(|id| Ok(Some(user(id, "a@x.com"))));

        let service = UserManager::new(Arc::new(repo));
        assert_eq!(service.get_user(7).await.unwrap().id, 7);
    }

    #[tokio::test]
    async fn test_get_user_not_found() {
        let mut repo = MockUserRepository::new();
        repo.expect_find_by_id().returning(|_| Ok(None));

        let service = UserManager::new(Arc::new(repo));
        assert!(matches!(service.get_user(1).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_create_user_rejects_known_email() {
        let mut repo = MockUserRepository::new();
        repo.expect_find_by_email_with_deleted()
            .returning(|email| Ok(Some(user(1, email))));
        repo.expect_create().never();

        let service = UserManager::new(Arc::new(repo));
        let err = service
            .create_user(CreateUser::new("a@x.com", None))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(ref m) if m == "Email"));
    }

    #[tokio::test]
    async fn test_create_user_maps_store_constraint_to_conflict() {
        let mut repo = MockUserRepository::new();
        repo.expect_find_by_email_with_deleted()
            .returning(|_| Ok(None));
        repo.expect_create().returning(|_| {
            Err(AppError::constraint(
                "unique constraint failed on user.email",
            ))
        });

        let service = UserManager::new(Arc::new(repo));
        let err = service
            .create_user(CreateUser::new("a@x.com", None))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(ref m) if m == "Email"));
    }

    #[tokio::test]
    async fn test_create_user_keeps_other_constraints() {
        let mut repo = MockUserRepository::new();
        repo.expect_find_by_email_with_deleted()
            .returning(|_| Ok(None));
        repo.expect_create()
            .returning(|_| Err(AppError::constraint("FOREIGN KEY constraint failed")));

        let service = UserManager::new(Arc::new(repo));
        let err = service
            .create_user(CreateUser::new("a@x.com", None))
            .await
            .unwrap_err();

        assert!(err.is_constraint_violation());
    }

    #[tokio::test]
    async fn test_create_user_validates_before_touching_store() {
        let mut repo = MockUserRepository::new();
        repo.expect_find_by_email_with_deleted().never();
        repo.expect_create().never();

        let service = UserManager::new(Arc::new(repo));
        let err = service
            .create_user(CreateUser::new("not-an-email", None))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_user_soft_deletes() {
        let mut repo = MockUserRepository::new();
        repo.expect_soft_delete().with(eq(3)).returning(|id| {
            let mut deleted = user(id, "a@x.com");
            deleted.deleted_at = Some(chrono::Utc::now());
            Ok(deleted)
        });
        repo.expect_delete().never();

        let service = UserManager::new(Arc::new(repo));
        assert!(service.delete_user(3).await.is_ok());
    }

    #[tokio::test]
    async fn test_restore_user_success() {
        let mut repo = MockUserRepository::new();
        repo.expect_restore()
            .returning(|id| Ok(user(id, "a@x.com")));

        let service = UserManager::new(Arc::new(repo));
        assert_eq!(service.restore_user(4).await.unwrap().id, 4);
    }
}
