//! Database adapter factory.
//!
//! Resolves a logical entity name to a delegate. The backing store is
//! passed in explicitly, and the entity bindings are an explicit table
//! built at startup, so an unknown name fails with the list of names
//! that do exist.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use common::{AppError, AppResult};

use crate::delegate::DatabaseDelegate;
use crate::include::RelationLoader;

// =============================================================================
// Backend selection
// =============================================================================

/// Store technologies with an adapter implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    SeaOrm,
    Memory,
}

impl Backend {
    /// Accepted configuration values
    pub const SUPPORTED: &'static [&'static str] = &["sea-orm", "memory"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::SeaOrm => "sea-orm",
            Backend::Memory => "memory",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sea-orm" | "sea_orm" | "seaorm" => Ok(Backend::SeaOrm),
            "memory" | "in-memory" => Ok(Backend::Memory),
            _ => Err(AppError::UnsupportedBackend {
                requested: value.to_string(),
                supported: Self::SUPPORTED.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }
}

// =============================================================================
// Store handles
// =============================================================================

/// Entity name normalization used for every binding lookup.
///
/// Resolution is case-insensitive: `"User"`, `"user"` and `"USER"` are
/// the same binding.
pub fn canonical_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A backing store with a table of entity bindings.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> Backend;

    /// Canonical names of the bound entities, sorted
    fn entities(&self) -> Vec<String>;

    /// Delegate bound to the ambient connection for a canonical entity name
    fn delegate(&self, entity: &str) -> AppResult<Arc<dyn DatabaseDelegate>>;

    /// Open a transaction scope on the store
    async fn begin(&self) -> AppResult<Arc<dyn StoreTransaction>>;
}

/// An open transaction on a [`Store`].
///
/// Dropping it without `commit` discards its writes.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Delegate bound to this transaction for a canonical entity name
    fn delegate(&self, entity: &str) -> AppResult<Arc<dyn DatabaseDelegate>>;

    async fn commit(&self) -> AppResult<()>;

    async fn rollback(&self) -> AppResult<()>;
}

// =============================================================================
// Relations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// At most one related record (stored as an object or null)
    One,
    /// Any number of related records (stored as an array)
    Many,
}

/// A named link from one entity to another, resolved for `include`.
///
/// Related records are those of `target` whose `foreign_field` equals
/// the source record's `local_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub target: String,
    pub local_field: String,
    pub foreign_field: String,
    pub kind: RelationKind,
}

impl Relation {
    /// `target` rows point back at us through `foreign_field`
    pub fn has_many(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            local_field: domain::ID_FIELD.to_string(),
            foreign_field: foreign_field.into(),
            kind: RelationKind::Many,
        }
    }

    /// We point at one `target` row through `local_field`
    pub fn belongs_to(
        name: impl Into<String>,
        target: impl Into<String>,
        local_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            local_field: local_field.into(),
            foreign_field: domain::ID_FIELD.to_string(),
            kind: RelationKind::One,
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

tokio::task_local! {
    /// Set on a task while a transaction callback runs on it
    static TRANSACTION_CALLBACK: ();
}

fn callback_running() -> bool {
    TRANSACTION_CALLBACK.try_with(|_| ()).is_ok()
}

/// Maps entity names to delegates on one store.
///
/// Cheap to clone; every repository holds its own copy. A factory created
/// by [`AdapterFactory::begin`] hands out delegates bound to that
/// transaction instead of the ambient connection.
#[derive(Clone)]
pub struct AdapterFactory {
    store: Arc<dyn Store>,
    transaction: Option<Arc<dyn StoreTransaction>>,
    relations: Arc<HashMap<String, Vec<Relation>>>,
}

impl AdapterFactory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            transaction: None,
            relations: Arc::new(HashMap::new()),
        }
    }

    /// Register a relation of `entity` for `include` resolution
    pub fn with_relation(mut self, entity: &str, relation: Relation) -> Self {
        Arc::make_mut(&mut self.relations)
            .entry(canonical_name(entity))
            .or_default()
            .push(relation);
        self
    }

    pub fn backend(&self) -> Backend {
        self.store.backend()
    }

    /// Canonical names of the entities this factory can resolve
    pub fn entities(&self) -> Vec<String> {
        self.store.entities()
    }

    /// True for factories created by [`AdapterFactory::begin`]
    pub fn is_transactional(&self) -> bool {
        self.transaction.is_some()
    }

    /// Resolve the delegate for `entity_name`.
    ///
    /// Fails with `UnknownEntity` when nothing is bound under that name.
    pub fn create_adapter(&self, entity_name: &str) -> AppResult<Arc<dyn DatabaseDelegate>> {
        let key = canonical_name(entity_name);
        let known = self.store.entities();
        if !known.contains(&key) {
            tracing::warn!(entity = entity_name, "no adapter binding for entity");
            return Err(AppError::UnknownEntity {
                name: entity_name.to_string(),
                known,
            });
        }

        let delegate = match &self.transaction {
            Some(transaction) => transaction.delegate(&key)?,
            None => self.store.delegate(&key)?,
        };

        tracing::debug!(
            entity = %key,
            backend = %self.backend(),
            transactional = self.is_transactional(),
            "created adapter"
        );

        let relations = self.relations.get(&key).cloned().unwrap_or_default();
        Ok(Arc::new(RelationLoader::new(
            key,
            delegate,
            relations,
            self.clone(),
        )))
    }

    /// Open a transaction and return a factory bound to it.
    ///
    /// Fails instead of waiting when called from inside a callback run by
    /// [`TransactionScope::run`] on this task: nested work must go through
    /// the transaction-bound factory, on every backend.
    pub async fn begin(&self) -> AppResult<TransactionScope> {
        if self.is_transactional() {
            return Err(AppError::internal(
                "cannot open a transaction from a transaction-bound factory",
            ));
        }
        if callback_running() {
            tracing::warn!(backend = %self.backend(), "transaction opened inside a transaction callback");
            return Err(AppError::internal(
                "cannot open a transaction inside a transaction callback; use the transaction-bound repository",
            ));
        }

        let handle = self.store.begin().await?;
        tracing::debug!(backend = %self.backend(), "transaction started");

        Ok(TransactionScope {
            factory: Self {
                store: self.store.clone(),
                transaction: Some(handle.clone()),
                relations: self.relations.clone(),
            },
            handle,
        })
    }
}

impl fmt::Debug for AdapterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterFactory")
            .field("backend", &self.backend())
            .field("entities", &self.entities())
            .field("transactional", &self.is_transactional())
            .finish()
    }
}

/// An open transaction plus the factory bound to it.
pub struct TransactionScope {
    factory: AdapterFactory,
    handle: Arc<dyn StoreTransaction>,
}

impl TransactionScope {
    pub fn factory(&self) -> &AdapterFactory {
        &self.factory
    }

    /// Drive `work` with this task marked as inside a transaction callback
    pub async fn run<F: Future>(&self, work: F) -> F::Output {
        TRANSACTION_CALLBACK.scope((), work).await
    }

    pub async fn commit(self) -> AppResult<()> {
        let Self { factory, handle } = self;
        drop(factory);
        handle.commit().await?;
        tracing::debug!("transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> AppResult<()> {
        let Self { factory, handle } = self;
        drop(factory);
        handle.rollback().await?;
        tracing::debug!("transaction rolled back");
        Ok(())
    }
}
