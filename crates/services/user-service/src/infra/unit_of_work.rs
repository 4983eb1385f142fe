//! Unit of Work over the user and post repositories.
//!
//! Repositories handed out by a [`TransactionContext`] share one store
//! transaction, so work spanning users and posts commits or rolls back
//! as a whole.

use std::sync::Arc;

use async_trait::async_trait;

use common::AppResult;
use repository::{AdapterFactory, TransactionFuture, TransactionalRepository};

use crate::repository::{PostRepository, UserRepository, UserStore};

/// Unit of Work trait for dependency injection.
///
/// Not mockable directly because of the generic method; tests mock the
/// repositories instead.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Get user repository
    fn users(&self) -> Arc<dyn UserRepository>;

    /// Get post repository
    fn posts(&self) -> PostRepository;

    /// Execute a closure within a transaction.
    ///
    /// Commits when the closure returns `Ok`, rolls back otherwise. Opening
    /// another transaction from inside the closure fails; use the
    /// repositories on the [`TransactionContext`].
    async fn transaction<F, T>(&self, f: F) -> AppResult<T>
    where
        F: for<'a> FnOnce(TransactionContext<'a>) -> TransactionFuture<'a, T> + Send,
        T: Send;
}

/// Repository access inside one transaction.
pub struct TransactionContext<'a> {
    factory: &'a AdapterFactory,
    default_limit: u64,
}

impl<'a> TransactionContext<'a> {
    fn new(factory: &'a AdapterFactory, default_limit: u64) -> Self {
        Self {
            factory,
            default_limit,
        }
    }

    /// User repository bound to this transaction
    pub fn users(&self) -> UserStore {
        UserStore::with_default_limit(self.factory.clone(), self.default_limit)
    }

    /// Post repository bound to this transaction
    pub fn posts(&self) -> PostRepository {
        TransactionalRepository::new(self.factory.clone()).with_default_limit(self.default_limit)
    }
}

/// Concrete implementation of UnitOfWork
pub struct Persistence {
    factory: AdapterFactory,
    default_limit: u64,
    user_repo: Arc<UserStore>,
}

impl Persistence {
    pub fn new(factory: AdapterFactory, default_limit: u64) -> Self {
        let user_repo = Arc::new(UserStore::with_default_limit(
            factory.clone(),
            default_limit,
        ));
        Self {
            factory,
            default_limit,
            user_repo,
        }
    }
}

#[async_trait]
impl UnitOfWork for Persistence {
    fn users(&self) -> Arc<dyn UserRepository> {
        self.user_repo.clone()
    }

    fn posts(&self) -> PostRepository {
        TransactionalRepository::new(self.factory.clone()).with_default_limit(self.default_limit)
    }

    async fn transaction<F, T>(&self, f: F) -> AppResult<T>
    where
        F: for<'a> FnOnce(TransactionContext<'a>) -> TransactionFuture<'a, T> + Send,
        T: Send,
    {
        let scope = self.factory.begin().await?;

        let outcome = scope
            .run(f(TransactionContext::new(scope.factory(), self.default_limit)))
            .await;

        match outcome {
            Ok(result) => {
                scope.commit().await?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = scope.rollback().await {
                    tracing::error!("Transaction rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}
