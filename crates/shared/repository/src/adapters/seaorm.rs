//! SeaORM adapter.
//!
//! Binds a SeaORM entity to the [`DatabaseDelegate`] contract. Records
//! are the serde form of the entity's `Model`; filter and payload values
//! are converted to SeaORM values by the target column's type.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, ColumnType, Condition, ConnectionTrait,
    DatabaseConnection, DatabaseTransaction, EntityName, EntityTrait, IdenStatic, IntoActiveModel,
    Iterable, Order, PaginatorTrait, PrimaryKeyToColumn, QueryFilter, QueryOrder, QuerySelect,
    Select, TransactionTrait, Value as SeaValue,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use common::{AppError, AppResult};

use crate::delegate::DatabaseDelegate;
use crate::factory::{canonical_name, Backend, Store, StoreTransaction};
use crate::query::{BatchCount, Filter, FindArgs, Record, Selection, SortOrder};

// =============================================================================
// Delegate
// =============================================================================

/// Delegate for entity `E` with active model `A` over connection `C`.
///
/// `C` is a pooled [`DatabaseConnection`] or an open
/// [`DatabaseTransaction`]. Multi-statement writes run inside a nested
/// transaction (a savepoint when `C` is already a transaction).
pub struct SeaOrmDelegate<E, A, C> {
    conn: Arc<C>,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A, C> SeaOrmDelegate<E, A, C>
where
    E: EntityTrait,
    E::Model: Serialize + IntoActiveModel<A> + Sync,
    A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync + 'static,
    C: ConnectionTrait + TransactionTrait + Send + Sync + 'static,
{
    pub fn new(conn: Arc<C>) -> Self {
        Self {
            conn,
            _marker: PhantomData,
        }
    }

    fn table() -> String {
        E::default().table_name().to_string()
    }

    fn column(field: &str) -> AppResult<E::Column> {
        E::Column::iter()
            .find(|column| column.as_str() == field)
            .ok_or_else(|| {
                AppError::validation(format!("unknown field '{}' on {}", field, Self::table()))
            })
    }

    fn condition(filter: Option<&Filter>) -> AppResult<Condition> {
        let mut condition = Condition::all();
        for (field, value) in filter.into_iter().flat_map(|filter| filter.iter()) {
            let column = Self::column(field)?;
            condition = if value.is_null() {
                condition.add(column.is_null())
            } else {
                condition.add(column.eq(to_sea_value(field, column.def().get_column_type(), value)?))
            };
        }
        Ok(condition)
    }

    fn select(args: &FindArgs) -> AppResult<Select<E>> {
        let mut query = E::find().filter(Self::condition(args.filter.as_ref())?);

        for key in args.order_by.iter().flatten() {
            let order = match key.order {
                SortOrder::Asc => Order::Asc,
                SortOrder::Desc => Order::Desc,
            };
            query = query.order_by(Self::column(&key.field)?, order);
        }
        if let Some(skip) = args.skip {
            query = query.offset(skip);
        }
        if let Some(take) = args.take {
            query = query.limit(take);
        }
        Ok(query)
    }

    fn to_record(model: &E::Model, select: Option<&Selection>) -> AppResult<Record> {
        let record = match serde_json::to_value(model)? {
            Value::Object(record) => record,
            _ => return Err(AppError::internal("model did not serialize to an object")),
        };
        Ok(match select {
            Some(selection) => selection.project(record),
            None => record,
        })
    }

    /// Copy record fields onto an active model
    fn assign(model: &mut A, data: &Record) -> AppResult<()> {
        for (field, value) in data {
            let column = Self::column(field)?;
            model.try_set(
                column,
                to_sea_value(field, column.def().get_column_type(), value)?,
            )?;
        }
        Ok(())
    }

    fn new_active_model(data: &Record) -> AppResult<A> {
        let mut model = <A as ActiveModelTrait>::default();

        let primary_keys: Vec<E::Column> = E::PrimaryKey::iter()
            .map(PrimaryKeyToColumn::into_column)
            .collect();
        let data: Record = data
            .iter()
            .filter(|(field, value)| {
                !(value.is_null() && primary_keys.iter().any(|pk| pk.as_str() == field.as_str()))
            })
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        Self::assign(&mut model, &data)?;

        for column in primary_keys {
            if model.is_not_set(column) && matches!(column.def().get_column_type(), ColumnType::Uuid) {
                model.try_set(column, SeaValue::from(Uuid::new_v4()))?;
            }
        }
        Ok(model)
    }

    async fn insert<D: ConnectionTrait>(db: &D, data: &Record) -> AppResult<E::Model> {
        let model = Self::new_active_model(data)?;
        Ok(ActiveModelTrait::insert(model, db).await?)
    }

    async fn update_model<D: ConnectionTrait>(
        db: &D,
        current: E::Model,
        data: &Record,
    ) -> AppResult<E::Model> {
        if data.is_empty() {
            return Ok(current);
        }
        let mut model: A = current.into_active_model();
        Self::assign(&mut model, data)?;
        Ok(ActiveModelTrait::update(model, db).await?)
    }

    async fn first_match<D: ConnectionTrait>(db: &D, filter: &Filter) -> AppResult<Option<E::Model>> {
        Ok(E::find()
            .filter(Self::condition(Some(filter))?)
            .one(db)
            .await?)
    }
}

#[async_trait]
impl<E, A, C> DatabaseDelegate for SeaOrmDelegate<E, A, C>
where
    E: EntityTrait,
    E::Model: Serialize + IntoActiveModel<A> + Sync,
    A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync + 'static,
    C: ConnectionTrait + TransactionTrait + Send + Sync + 'static,
{
    async fn find_unique(
        &self,
        filter: &Filter,
        select: Option<&Selection>,
    ) -> AppResult<Option<Record>> {
        Self::first_match(&*self.conn, filter)
            .await?
            .map(|model| Self::to_record(&model, select))
            .transpose()
    }

    async fn find_first(&self, args: &FindArgs) -> AppResult<Option<Record>> {
        if args.take == Some(0) {
            return Ok(None);
        }
        let model = Self::select(args)?.limit(1).one(&*self.conn).await?;
        model
            .map(|model| Self::to_record(&model, args.select.as_ref()))
            .transpose()
    }

    async fn find_many(&self, args: &FindArgs) -> AppResult<Vec<Record>> {
        let models = Self::select(args)?.all(&*self.conn).await?;
        models
            .iter()
            .map(|model| Self::to_record(model, args.select.as_ref()))
            .collect()
    }

    async fn count(&self, filter: Option<&Filter>) -> AppResult<u64> {
        Ok(E::find()
            .filter(Self::condition(filter)?)
            .count(&*self.conn)
            .await?)
    }

    async fn create(&self, data: Record) -> AppResult<Record> {
        let model = Self::insert(&*self.conn, &data).await?;
        Self::to_record(&model, None)
    }

    async fn create_many(&self, data: Vec<Record>) -> AppResult<BatchCount> {
        let tx = self.conn.begin().await?;
        for row in &data {
            Self::insert(&tx, row).await?;
        }
        tx.commit().await?;
        Ok(BatchCount::new(data.len() as u64))
    }

    async fn update(&self, filter: &Filter, data: Record) -> AppResult<Record> {
        let tx = self.conn.begin().await?;
        let current = Self::first_match(&tx, filter)
            .await?
            .ok_or(AppError::NotFound)?;
        let model = Self::update_model(&tx, current, &data).await?;
        tx.commit().await?;
        Self::to_record(&model, None)
    }

    async fn update_many(&self, filter: &Filter, data: Record) -> AppResult<BatchCount> {
        if data.is_empty() {
            return self.count(Some(filter)).await.map(BatchCount::new);
        }

        let mut query = E::update_many();
        for (field, value) in &data {
            let column = Self::column(field)?;
            let value = to_sea_value(field, column.def().get_column_type(), value)?;
            query = query.col_expr(column, Expr::value(value));
        }
        let result = query
            .filter(Self::condition(Some(filter))?)
            .exec(&*self.conn)
            .await?;
        Ok(BatchCount::new(result.rows_affected))
    }

    async fn upsert(
        &self,
        filter: &Filter,
        create: Record,
        update: Record,
    ) -> AppResult<Record> {
        let tx = self.conn.begin().await?;
        let model = match Self::first_match(&tx, filter).await? {
            Some(current) => Self::update_model(&tx, current, &update).await?,
            None => Self::insert(&tx, &create).await?,
        };
        tx.commit().await?;
        Self::to_record(&model, None)
    }

    async fn delete(&self, filter: &Filter) -> AppResult<Record> {
        let tx = self.conn.begin().await?;
        let current = Self::first_match(&tx, filter)
            .await?
            .ok_or(AppError::NotFound)?;
        let record = Self::to_record(&current, None)?;
        let model: A = current.into_active_model();
        ActiveModelTrait::delete(model, &tx).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn delete_many(&self, filter: &Filter) -> AppResult<BatchCount> {
        let result = E::delete_many()
            .filter(Self::condition(Some(filter))?)
            .exec(&*self.conn)
            .await?;
        Ok(BatchCount::new(result.rows_affected))
    }
}

// =============================================================================
// Value conversion
// =============================================================================

fn invalid(field: &str, value: &Value) -> AppError {
    AppError::validation(format!("invalid value for field '{}': {}", field, value))
}

fn integer<T>(field: &str, value: &Value) -> AppResult<SeaValue>
where
    T: TryFrom<i64> + Into<SeaValue> + sea_orm::sea_query::Nullable,
{
    if value.is_null() {
        return Ok(SeaValue::from(None::<T>));
    }
    value
        .as_i64()
        .and_then(|n| T::try_from(n).ok())
        .map(Into::into)
        .ok_or_else(|| invalid(field, value))
}

fn parse_text<T>(field: &str, value: &Value, parse: impl FnOnce(&str) -> Option<T>) -> AppResult<SeaValue>
where
    T: Into<SeaValue> + sea_orm::sea_query::Nullable,
{
    if value.is_null() {
        return Ok(SeaValue::from(None::<T>));
    }
    value
        .as_str()
        .and_then(parse)
        .map(Into::into)
        .ok_or_else(|| invalid(field, value))
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| parse_timestamp(text).map(|timestamp| timestamp.naive_utc()))
}

/// Convert a JSON value to the SeaORM value `column_type` stores.
fn to_sea_value(field: &str, column_type: &ColumnType, value: &Value) -> AppResult<SeaValue> {
    match column_type {
        ColumnType::Boolean => match value {
            Value::Null => Ok(SeaValue::from(None::<bool>)),
            Value::Bool(flag) => Ok(SeaValue::from(*flag)),
            _ => Err(invalid(field, value)),
        },
        ColumnType::TinyInteger => integer::<i8>(field, value),
        ColumnType::SmallInteger => integer::<i16>(field, value),
        ColumnType::Integer => integer::<i32>(field, value),
        ColumnType::BigInteger => integer::<i64>(field, value),
        ColumnType::TinyUnsigned => integer::<u8>(field, value),
        ColumnType::SmallUnsigned => integer::<u16>(field, value),
        ColumnType::Unsigned => integer::<u32>(field, value),
        ColumnType::BigUnsigned => integer::<u64>(field, value),
        ColumnType::Float => match value {
            Value::Null => Ok(SeaValue::from(None::<f32>)),
            _ => value
                .as_f64()
                .map(|n| SeaValue::from(n as f32))
                .ok_or_else(|| invalid(field, value)),
        },
        ColumnType::Double => match value {
            Value::Null => Ok(SeaValue::from(None::<f64>)),
            _ => value
                .as_f64()
                .map(SeaValue::from)
                .ok_or_else(|| invalid(field, value)),
        },
        ColumnType::Uuid => parse_text(field, value, |text| Uuid::parse_str(text).ok()),
        ColumnType::TimestampWithTimeZone => parse_text(field, value, parse_timestamp),
        ColumnType::DateTime | ColumnType::Timestamp => parse_text(field, value, parse_naive),
        ColumnType::Json | ColumnType::JsonBinary => Ok(SeaValue::from(value.clone())),
        ColumnType::Char(_) | ColumnType::String(_) | ColumnType::Text => {
            parse_text(field, value, |text| Some(text.to_string()))
        }
        _ => match value {
            Value::Null => Ok(SeaValue::from(None::<String>)),
            Value::Bool(flag) => Ok(SeaValue::from(*flag)),
            Value::Number(n) => Ok(match n.as_i64() {
                Some(int) => SeaValue::from(int),
                None => SeaValue::from(n.as_f64().unwrap_or_default()),
            }),
            Value::String(text) => Ok(SeaValue::from(text.clone())),
            other => Ok(SeaValue::from(other.clone())),
        },
    }
}

// =============================================================================
// Store
// =============================================================================

/// Builds delegates for one bound entity.
trait EntityBinding: Send + Sync {
    fn on_pool(&self, conn: Arc<DatabaseConnection>) -> Arc<dyn DatabaseDelegate>;

    fn on_transaction(&self, tx: Arc<DatabaseTransaction>) -> Arc<dyn DatabaseDelegate>;
}

struct Binding<E, A>(PhantomData<fn() -> (E, A)>);

impl<E, A> EntityBinding for Binding<E, A>
where
    E: EntityTrait,
    E::Model: Serialize + IntoActiveModel<A> + Sync,
    A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync + 'static,
{
    fn on_pool(&self, conn: Arc<DatabaseConnection>) -> Arc<dyn DatabaseDelegate> {
        Arc::new(SeaOrmDelegate::<E, A, DatabaseConnection>::new(conn))
    }

    fn on_transaction(&self, tx: Arc<DatabaseTransaction>) -> Arc<dyn DatabaseDelegate> {
        Arc::new(SeaOrmDelegate::<E, A, DatabaseTransaction>::new(tx))
    }
}

type Bindings = Arc<BTreeMap<String, Arc<dyn EntityBinding>>>;

fn binding<'a>(bindings: &'a Bindings, entity: &str) -> AppResult<&'a Arc<dyn EntityBinding>> {
    bindings.get(entity).ok_or_else(|| AppError::UnknownEntity {
        name: entity.to_string(),
        known: bindings.keys().cloned().collect(),
    })
}

/// [`Store`] over a SeaORM connection pool.
#[derive(Clone)]
pub struct SeaOrmStore {
    conn: Arc<DatabaseConnection>,
    bindings: Bindings,
}

impl SeaOrmStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self {
            conn: Arc::new(conn),
            bindings: Arc::new(BTreeMap::new()),
        }
    }

    /// Bind `name` to entity `E` with active model `A`
    pub fn bind<E, A>(mut self, name: &str) -> Self
    where
        E: EntityTrait,
        E::Model: Serialize + IntoActiveModel<A> + Sync,
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync + 'static,
    {
        let binding: Arc<dyn EntityBinding> = Arc::new(Binding::<E, A>(PhantomData));
        Arc::make_mut(&mut self.bindings).insert(canonical_name(name), binding);
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }
}

#[async_trait]
impl Store for SeaOrmStore {
    fn backend(&self) -> Backend {
        Backend::SeaOrm
    }

    fn entities(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    fn delegate(&self, entity: &str) -> AppResult<Arc<dyn DatabaseDelegate>> {
        Ok(binding(&self.bindings, entity)?.on_pool(self.conn.clone()))
    }

    async fn begin(&self) -> AppResult<Arc<dyn StoreTransaction>> {
        let tx = self.conn.begin().await?;
        Ok(Arc::new(SeaOrmTransaction {
            tx: Mutex::new(Some(Arc::new(tx))),
            bindings: self.bindings.clone(),
        }))
    }
}

/// Open SeaORM transaction shared by the delegates bound to it.
struct SeaOrmTransaction {
    tx: Mutex<Option<Arc<DatabaseTransaction>>>,
    bindings: Bindings,
}

impl SeaOrmTransaction {
    fn take(&self) -> AppResult<Arc<DatabaseTransaction>> {
        self.tx
            .lock()
            .map_err(|_| AppError::internal("transaction lock poisoned"))?
            .take()
            .ok_or_else(|| AppError::internal("transaction already finished"))
    }
}

#[async_trait]
impl StoreTransaction for SeaOrmTransaction {
    fn delegate(&self, entity: &str) -> AppResult<Arc<dyn DatabaseDelegate>> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| AppError::internal("transaction lock poisoned"))?
            .clone()
            .ok_or_else(|| AppError::internal("transaction already finished"))?;
        Ok(binding(&self.bindings, entity)?.on_transaction(tx))
    }

    async fn commit(&self) -> AppResult<()> {
        let tx = Arc::try_unwrap(self.take()?)
            .map_err(|_| AppError::internal("transaction is still referenced"))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> AppResult<()> {
        match Arc::try_unwrap(self.take()?) {
            Ok(tx) => tx.rollback().await?,
            // The last remaining handle rolls back when it is dropped
            Err(_) => tracing::warn!("rolling back a transaction that is still referenced"),
        }
        Ok(())
    }
}
