//! Repository with scoped transactions.

use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;

use serde::Serialize;

use common::AppResult;
use domain::Entity;

use crate::base::BaseRepository;
use crate::factory::AdapterFactory;

/// Future returned by a transaction callback
pub type TransactionFuture<'a, R> = Pin<Box<dyn Future<Output = AppResult<R>> + Send + 'a>>;

/// A [`BaseRepository`] that can run work inside one store transaction.
///
/// All base operations are available through `Deref`.
pub struct TransactionalRepository<T, C, U> {
    base: BaseRepository<T, C, U>,
}

impl<T, C, U> TransactionalRepository<T, C, U>
where
    T: Entity,
    C: Serialize + Send + Sync,
    U: Serialize + Send + Sync,
{
    pub fn new(factory: AdapterFactory) -> Self {
        Self::from_base(BaseRepository::new(factory))
    }

    pub fn from_base(base: BaseRepository<T, C, U>) -> Self {
        Self { base }
    }

    pub fn with_default_limit(self, default_limit: u64) -> Self {
        Self::from_base(self.base.with_default_limit(default_limit))
    }

    /// True when this repository is bound to an open transaction
    pub fn in_transaction(&self) -> bool {
        self.base.factory().is_transactional()
    }

    /// Run `callback` with a repository bound to a new transaction.
    ///
    /// Commits when the callback returns `Ok`; on `Err` rolls back and
    /// returns the callback's error. A failed rollback is logged and does
    /// not replace that error.
    ///
    /// Called on a repository that is already transaction-bound, the
    /// callback joins the enclosing transaction and the outer scope decides
    /// whether it commits. Starting a transaction from a repository that is
    /// not bound, while a callback is running on the same task, fails with
    /// `AppError::Internal` on every backend; use the repositories handed to
    /// the callback instead.
    ///
    /// ```ignore
    /// let user = repo
    ///     .with_transaction(|tx| {
    ///         Box::pin(async move {
    ///             let user = tx.create(CreateUser::new("a@x.com", None)).await?;
    ///             tx.update(user.id, UpdateUser::default()).await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_transaction<R, F>(&self, callback: F) -> AppResult<R>
    where
        F: for<'a> FnOnce(&'a TransactionalRepository<T, C, U>) -> TransactionFuture<'a, R> + Send,
        R: Send,
    {
        if self.in_transaction() {
            tracing::debug!(
                entity = %self.entity_name(),
                "joining enclosing transaction"
            );
            return callback(self).await;
        }

        let scope = self.base.factory().begin().await?;
        let bound = Self::from_base(self.base.bound_to(scope.factory().clone()));

        let outcome = scope.run(callback(&bound)).await;
        drop(bound);

        match outcome {
            Ok(value) => {
                scope.commit().await?;
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(entity = %self.entity_name(), error = %err, "rolling back transaction");
                if let Err(rollback_err) = scope.rollback().await {
                    tracing::error!("Transaction rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

impl<T, C, U> Deref for TransactionalRepository<T, C, U> {
    type Target = BaseRepository<T, C, U>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

/// Shorthand for [`TransactionalRepository::with_transaction`] that boxes
/// the callback body.
///
/// ```ignore
/// let user = with_transaction!(repo, |tx| {
///     tx.create(CreateUser::new("a@x.com", None)).await
/// })
/// .await?;
/// ```
#[macro_export]
macro_rules! with_transaction {
    ($repo:expr, |$tx:ident| $body:expr) => {
        $repo.with_transaction(|$tx| ::std::boxed::Box::pin(async move { $body }))
    };
}
