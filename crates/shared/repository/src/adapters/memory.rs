//! In-memory store.
//!
//! One table of JSON records per entity. Used by tests and by the
//! `memory` backend. Transactions work on a snapshot of the whole store,
//! are serialized against each other, and fail to commit when the store
//! was written outside the transaction after it began.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use common::{AppError, AppResult};
use domain::ID_FIELD;

use crate::delegate::DatabaseDelegate;
use crate::factory::{canonical_name, Backend, Store, StoreTransaction};
use crate::query::{compare_values, BatchCount, Filter, FindArgs, Record, Selection, SortOrder};

// =============================================================================
// Schema
// =============================================================================

/// How a table fills in a missing primary key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdStrategy {
    /// Integers counting up from 1
    #[default]
    AutoIncrement,
    /// Random v4 UUID strings
    Uuid,
}

/// Shape of one in-memory table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    primary_key: String,
    id_strategy: IdStrategy,
    unique: Vec<String>,
    defaults: Record,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl TableSchema {
    pub fn new(entity: &str) -> Self {
        Self {
            name: canonical_name(entity),
            primary_key: ID_FIELD.to_string(),
            id_strategy: IdStrategy::default(),
            unique: Vec::new(),
            defaults: Record::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = field.into();
        self
    }

    pub fn uuid_ids(mut self) -> Self {
        self.id_strategy = IdStrategy::Uuid;
        self
    }

    /// Reject writes that would give two records the same non-null value
    pub fn unique(mut self, field: impl Into<String>) -> Self {
        self.unique.push(field.into());
        self
    }

    /// Value stored when a create payload leaves `field` out
    pub fn default_value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(field.into(), value.into());
        self
    }

    /// Fields stamped on create and on every update
    pub fn timestamps(mut self, created: impl Into<String>, updated: impl Into<String>) -> Self {
        self.created_at = Some(created.into());
        self.updated_at = Some(updated.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

// =============================================================================
// Tables
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Record>,
    last_id: i64,
}

impl Table {
    fn matching(&self, filter: Option<&Filter>) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| filter.map_or(true, |f| f.matches(row)))
            .map(|(index, _)| index)
            .collect()
    }

    fn query(&self, args: &FindArgs) -> Vec<Record> {
        let mut rows: Vec<&Record> = self
            .matching(args.filter.as_ref())
            .into_iter()
            .map(|index| &self.rows[index])
            .collect();

        if let Some(order_by) = &args.order_by {
            rows.sort_by(|a, b| {
                for key in order_by {
                    let left = a.get(&key.field).unwrap_or(&Value::Null);
                    let right = b.get(&key.field).unwrap_or(&Value::Null);
                    let ord = match key.order {
                        SortOrder::Asc => compare_values(left, right),
                        SortOrder::Desc => compare_values(right, left),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let skip = args.skip.unwrap_or(0) as usize;
        let take = args.take.map_or(usize::MAX, |take| take as usize);

        rows.into_iter()
            .skip(skip)
            .take(take)
            .map(|row| project(row.clone(), args.select.as_ref()))
            .collect()
    }

    fn check_unique(&self, schema: &TableSchema, candidate: &Record, skip: Option<usize>) -> AppResult<()> {
        let fields = std::iter::once(&schema.primary_key).chain(schema.unique.iter());

        for field in fields {
            let Some(value) = candidate.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = self.rows.iter().enumerate().any(|(index, row)| {
                Some(index) != skip
                    && row
                        .get(field)
                        .is_some_and(|existing| compare_values(existing, value) == Ordering::Equal)
            });
            if taken {
                return Err(AppError::constraint(format!(
                    "unique constraint failed on {}.{}",
                    schema.name, field
                )));
            }
        }
        Ok(())
    }

    fn insert(&mut self, schema: &TableSchema, data: Record) -> AppResult<Record> {
        let mut row = schema.defaults.clone();
        row.extend(data);

        match row.get(&schema.primary_key) {
            None | Some(Value::Null) => {
                let id = match schema.id_strategy {
                    IdStrategy::AutoIncrement => {
                        self.last_id += 1;
                        Value::from(self.last_id)
                    }
                    IdStrategy::Uuid => Value::String(Uuid::new_v4().to_string()),
                };
                row.insert(schema.primary_key.clone(), id);
            }
            Some(explicit) => {
                if let Some(id) = explicit.as_i64() {
                    self.last_id = self.last_id.max(id);
                }
            }
        }

        for field in [&schema.created_at, &schema.updated_at].into_iter().flatten() {
            if row.get(field).map_or(true, Value::is_null) {
                row.insert(field.clone(), now());
            }
        }

        self.check_unique(schema, &row, None)?;
        self.rows.push(row.clone());
        Ok(row)
    }

    fn update_at(&mut self, schema: &TableSchema, index: usize, data: &Record) -> AppResult<Record> {
        let mut row = self.rows[index].clone();
        for (field, value) in data {
            row.insert(field.clone(), value.clone());
        }
        if let Some(field) = &schema.updated_at {
            if !data.contains_key(field) {
                row.insert(field.clone(), now());
            }
        }

        self.check_unique(schema, &row, Some(index))?;
        self.rows[index] = row.clone();
        Ok(row)
    }
}

fn project(row: Record, select: Option<&Selection>) -> Record {
    match select {
        Some(selection) => selection.project(row),
        None => row,
    }
}

// =============================================================================
// Shared state
// =============================================================================

#[derive(Debug, Clone, Default)]
struct MemoryState {
    version: u64,
    tables: HashMap<String, Table>,
}

impl MemoryState {
    fn read<R>(&self, table: &str, f: impl FnOnce(&Table) -> R) -> R {
        match self.tables.get(table) {
            Some(rows) => f(rows),
            None => f(&Table::default()),
        }
    }

    /// Run a write against a copy of the table and keep it only on success
    fn write<R>(&mut self, table: &str, f: impl FnOnce(&mut Table) -> AppResult<R>) -> AppResult<R> {
        let mut working = self.tables.get(table).cloned().unwrap_or_default();
        let result = f(&mut working)?;
        self.tables.insert(table.to_string(), working);
        self.version += 1;
        Ok(result)
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MemoryState>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> AppResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| AppError::internal("memory store lock poisoned"))
}

/// Open transaction state.
struct TransactionState {
    shared: Arc<Shared>,
    origin_version: u64,
    workspace: Mutex<Option<MemoryState>>,
    gate: Mutex<Option<OwnedMutexGuard<()>>>,
}

impl TransactionState {
    fn finish(&self) -> AppResult<MemoryState> {
        let workspace = lock(&self.workspace)?
            .take()
            .ok_or_else(|| AppError::internal("transaction already finished"))?;
        Ok(workspace)
    }

    fn release(&self) -> AppResult<()> {
        lock(&self.gate)?.take();
        Ok(())
    }
}

#[derive(Clone)]
enum Scope {
    Store(Arc<Shared>),
    Transaction(Arc<TransactionState>),
}

impl Scope {
    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> AppResult<R>) -> AppResult<R> {
        match self {
            Scope::Store(shared) => f(&mut *lock(&shared.state)?),
            Scope::Transaction(tx) => {
                let mut workspace = lock(&tx.workspace)?;
                let state = workspace
                    .as_mut()
                    .ok_or_else(|| AppError::internal("transaction already finished"))?;
                f(state)
            }
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// In-memory [`Store`] with one table per registered schema.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    schemas: Arc<BTreeMap<String, TableSchema>>,
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table
    pub fn table(mut self, schema: TableSchema) -> Self {
        Arc::make_mut(&mut self.schemas).insert(schema.name.clone(), schema);
        self
    }

    fn schema(&self, entity: &str) -> AppResult<&TableSchema> {
        self.schemas.get(entity).ok_or_else(|| AppError::UnknownEntity {
            name: entity.to_string(),
            known: self.schemas.keys().cloned().collect(),
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    fn entities(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    fn delegate(&self, entity: &str) -> AppResult<Arc<dyn DatabaseDelegate>> {
        Ok(Arc::new(MemoryDelegate {
            schema: self.schema(entity)?.clone(),
            scope: Scope::Store(self.shared.clone()),
        }))
    }

    async fn begin(&self) -> AppResult<Arc<dyn StoreTransaction>> {
        let guard = self.shared.gate.clone().lock_owned().await;
        let snapshot = lock(&self.shared.state)?.clone();
        tracing::trace!(version = snapshot.version, "memory transaction opened");

        Ok(Arc::new(MemoryTransaction {
            store: self.clone(),
            state: Arc::new(TransactionState {
                shared: self.shared.clone(),
                origin_version: snapshot.version,
                workspace: Mutex::new(Some(snapshot)),
                gate: Mutex::new(Some(guard)),
            }),
        }))
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    state: Arc<TransactionState>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    fn delegate(&self, entity: &str) -> AppResult<Arc<dyn DatabaseDelegate>> {
        Ok(Arc::new(MemoryDelegate {
            schema: self.store.schema(entity)?.clone(),
            scope: Scope::Transaction(self.state.clone()),
        }))
    }

    async fn commit(&self) -> AppResult<()> {
        let workspace = self.state.finish()?;
        let outcome = {
            let mut current = lock(&self.state.shared.state)?;
            if current.version != self.state.origin_version {
                Err(AppError::TransactionConflict)
            } else {
                current.tables = workspace.tables;
                current.version += 1;
                Ok(())
            }
        };
        self.state.release()?;
        outcome
    }

    async fn rollback(&self) -> AppResult<()> {
        self.state.finish()?;
        self.state.release()
    }
}

// =============================================================================
// Delegate
// =============================================================================

struct MemoryDelegate {
    schema: TableSchema,
    scope: Scope,
}

impl MemoryDelegate {
    fn read<R>(&self, f: impl FnOnce(&Table) -> R) -> AppResult<R> {
        self.scope
            .with_state(|state| Ok(state.read(&self.schema.name, f)))
    }

    fn write<R>(&self, f: impl FnOnce(&TableSchema, &mut Table) -> AppResult<R>) -> AppResult<R> {
        let schema = &self.schema;
        self.scope
            .with_state(|state| state.write(&schema.name, |table| f(schema, table)))
    }
}

#[async_trait]
impl DatabaseDelegate for MemoryDelegate {
    async fn find_unique(
        &self,
        filter: &Filter,
        select: Option<&Selection>,
    ) -> AppResult<Option<Record>> {
        self.read(|table| {
            table
                .matching(Some(filter))
                .first()
                .map(|&index| project(table.rows[index].clone(), select))
        })
    }

    async fn find_first(&self, args: &FindArgs) -> AppResult<Option<Record>> {
        let args = FindArgs {
            take: Some(args.take.map_or(1, |take| take.min(1))),
            ..args.clone()
        };
        self.read(|table| table.query(&args).into_iter().next())
    }

    async fn find_many(&self, args: &FindArgs) -> AppResult<Vec<Record>> {
        self.read(|table| table.query(args))
    }

    async fn count(&self, filter: Option<&Filter>) -> AppResult<u64> {
        self.read(|table| table.matching(filter).len() as u64)
    }

    async fn create(&self, data: Record) -> AppResult<Record> {
        self.write(|schema, table| table.insert(schema, data))
    }

    async fn create_many(&self, data: Vec<Record>) -> AppResult<BatchCount> {
        self.write(|schema, table| {
            let count = data.len() as u64;
            for row in data {
                table.insert(schema, row)?;
            }
            Ok(BatchCount::new(count))
        })
    }

    async fn update(&self, filter: &Filter, data: Record) -> AppResult<Record> {
        self.write(|schema, table| {
            let index = *table.matching(Some(filter)).first().ok_or(AppError::NotFound)?;
            table.update_at(schema, index, &data)
        })
    }

    async fn update_many(&self, filter: &Filter, data: Record) -> AppResult<BatchCount> {
        self.write(|schema, table| {
            let matched = table.matching(Some(filter));
            if !data.is_empty() {
                for &index in &matched {
                    table.update_at(schema, index, &data)?;
                }
            }
            Ok(BatchCount::new(matched.len() as u64))
        })
    }

    async fn upsert(
        &self,
        filter: &Filter,
        create: Record,
        update: Record,
    ) -> AppResult<Record> {
        self.write(|schema, table| match table.matching(Some(filter)).first() {
            Some(&index) => table.update_at(schema, index, &update),
            None => table.insert(schema, create),
        })
    }

    async fn delete(&self, filter: &Filter) -> AppResult<Record> {
        self.write(|_, table| {
            let index = *table.matching(Some(filter)).first().ok_or(AppError::NotFound)?;
            Ok(table.rows.remove(index))
        })
    }

    async fn delete_many(&self, filter: &Filter) -> AppResult<BatchCount> {
        self.write(|_, table| {
            let before = table.rows.len();
            table.rows.retain(|row| !filter.matches(row));
            Ok(BatchCount::new((before - table.rows.len()) as u64))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::new()
            .table(TableSchema::new("User").unique("email"))
            .table(
                TableSchema::new("Post")
                    .default_value("published", false)
                    .default_value("view_count", 0)
                    .timestamps("created_at", "updated_at"),
            )
            .table(TableSchema::new("Session").uuid_ids())
    }

    #[tokio::test]
    async fn test_insert_fills_generated_fields() {
        let store = store();
        let posts = store.delegate("post").unwrap();

        let post = posts.create(record(json!({ "title": "Hello" }))).await.unwrap();
        assert_eq!(post["id"], json!(1));
        assert_eq!(post["published"], json!(false));
        assert_eq!(post["view_count"], json!(0));
        assert!(post["created_at"].is_string());

        let second = posts.create(record(json!({ "title": "Again" }))).await.unwrap();
        assert_eq!(second["id"], json!(2));

        let sessions = store.delegate("session").unwrap();
        let session = sessions.create(Record::new()).await.unwrap();
        assert!(Uuid::parse_str(session["id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_unique_violation_names_the_field() {
        let users = store().delegate("user").unwrap();
        users.create(record(json!({ "email": "a@x.com" }))).await.unwrap();

        match users.create(record(json!({ "email": "a@x.com" }))).await {
            Err(AppError::ConstraintViolation(msg)) => assert!(msg.contains("email")),
            other => panic!("expected constraint violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_many_is_all_or_nothing() {
        let users = store().delegate("user").unwrap();

        let err = users
            .create_many(vec![
                record(json!({ "email": "a@x.com" })),
                record(json!({ "email": "a@x.com" })),
            ])
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(users.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ordering_and_window() {
        let users = store().delegate("user").unwrap();
        for email in ["c@x.com", "a@x.com", "b@x.com"] {
            users.create(record(json!({ "email": email }))).await.unwrap();
        }

        let args = FindArgs {
            order_by: Some(vec![crate::query::OrderBy::desc("email")]),
            skip: Some(1),
            take: Some(1),
            ..Default::default()
        };
        let rows = users.find_many(&args).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["email"], json!("b@x.com"));
    }

    #[tokio::test]
    async fn test_update_many_with_empty_data_counts_matches() {
        let users = store().delegate("user").unwrap();
        users.create(record(json!({ "email": "a@x.com" }))).await.unwrap();

        let result = users.update_many(&Filter::new(), Record::new()).await.unwrap();
        assert_eq!(result.count, 1);
    }

    #[tokio::test]
    async fn test_transaction_snapshot_and_commit() {
        let store = store();
        let tx = store.begin().await.unwrap();
        tx.delegate("user")
            .unwrap()
            .create(record(json!({ "email": "a@x.com" })))
            .await
            .unwrap();

        let users = store.delegate("user").unwrap();
        assert_eq!(users.count(None).await.unwrap(), 0);

        tx.commit().await.unwrap();
        assert_eq!(users.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_conflicts_with_outside_write() {
        let store = store();
        let tx = store.begin().await.unwrap();

        store
            .delegate("user")
            .unwrap()
            .create(record(json!({ "email": "outside@x.com" })))
            .await
            .unwrap();

        assert!(matches!(tx.commit().await, Err(AppError::TransactionConflict)));

        // The gate is released even though the commit failed
        let next = store.begin().await.unwrap();
        next.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_gate() {
        let store = store();
        drop(store.begin().await.unwrap());
        let tx = store.begin().await.unwrap();
        tx.rollback().await.unwrap();
        assert!(tx.commit().await.is_err());
    }
}
