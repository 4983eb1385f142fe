//! Relation loading for `include`.
//!
//! Wraps a raw adapter and resolves included relations by querying the
//! related entity's delegate from the same factory, so the related reads
//! run on the same connection or transaction as the parent read.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use common::{AppError, AppResult};

use crate::delegate::DatabaseDelegate;
use crate::factory::{AdapterFactory, Relation, RelationKind};
use crate::query::{BatchCount, Filter, FindArgs, Include, Record, Selection};

pub(crate) struct RelationLoader {
    entity: String,
    inner: Arc<dyn DatabaseDelegate>,
    relations: Vec<Relation>,
    factory: AdapterFactory,
}

impl RelationLoader {
    pub(crate) fn new(
        entity: String,
        inner: Arc<dyn DatabaseDelegate>,
        relations: Vec<Relation>,
        factory: AdapterFactory,
    ) -> Self {
        Self {
            entity,
            inner,
            relations,
            factory,
        }
    }

    /// Enabled relations of `include`, failing on names we don't know
    fn requested<'a>(&'a self, include: &'a Include) -> AppResult<Vec<(&'a Relation, FindArgs)>> {
        include
            .iter()
            .filter(|(_, spec)| spec.is_enabled())
            .map(|(name, spec)| {
                self.relations
                    .iter()
                    .find(|relation| relation.name == *name)
                    .map(|relation| (relation, spec.args()))
                    .ok_or_else(|| {
                        AppError::validation(format!(
                            "unknown relation '{}' on {}",
                            name, self.entity
                        ))
                    })
            })
            .collect()
    }

    /// Arguments for the wrapped adapter.
    ///
    /// Strips `include` and widens a projection with the join keys the
    /// relations need; the added fields are returned so they can be
    /// removed again after loading.
    fn inner_args(&self, args: &FindArgs, requested: &[(&Relation, FindArgs)]) -> (FindArgs, Vec<String>) {
        let mut inner = FindArgs {
            include: None,
            ..args.clone()
        };
        let mut added = Vec::new();

        if let Some(select) = inner.select.take() {
            let mut widened: Selection = select;
            for (relation, _) in requested {
                if !widened.includes(&relation.local_field) {
                    widened = widened.set(relation.local_field.clone(), true);
                    added.push(relation.local_field.clone());
                }
            }
            inner.select = Some(widened);
        }

        (inner, added)
    }

    async fn load(
        &self,
        records: &mut [Record],
        requested: &[(&Relation, FindArgs)],
    ) -> AppResult<()> {
        for (relation, nested) in requested {
            let target = self.factory.create_adapter(&relation.target)?;

            for record in records.iter_mut() {
                let key = record
                    .get(&relation.local_field)
                    .cloned()
                    .unwrap_or(Value::Null);

                let loaded = if key.is_null() {
                    match relation.kind {
                        RelationKind::One => Value::Null,
                        RelationKind::Many => Value::Array(Vec::new()),
                    }
                } else {
                    let mut args = nested.clone();
                    let filter = args
                        .filter
                        .take()
                        .unwrap_or_default()
                        .eq(relation.foreign_field.clone(), key);
                    args.filter = Some(filter);

                    match relation.kind {
                        RelationKind::One => target
                            .find_first(&args)
                            .await?
                            .map(Value::Object)
                            .unwrap_or(Value::Null),
                        RelationKind::Many => Value::Array(
                            target
                                .find_many(&args)
                                .await?
                                .into_iter()
                                .map(Value::Object)
                                .collect(),
                        ),
                    }
                };

                record.insert(relation.name.clone(), loaded);
            }
        }

        Ok(())
    }

    async fn find_with_relations(&self, args: &FindArgs, first_only: bool) -> AppResult<Vec<Record>> {
        let requested = match &args.include {
            Some(include) => self.requested(include)?,
            None => Vec::new(),
        };
        let (inner_args, added) = self.inner_args(args, &requested);

        let mut records = if first_only {
            self.inner.find_first(&inner_args).await?.into_iter().collect()
        } else {
            self.inner.find_many(&inner_args).await?
        };

        if !requested.is_empty() {
            tracing::debug!(
                entity = %self.entity,
                relations = requested.len(),
                records = records.len(),
                "loading included relations"
            );
            self.load(&mut records, &requested).await?;
        }

        for record in records.iter_mut() {
            for field in &added {
                record.remove(field);
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl DatabaseDelegate for RelationLoader {
    async fn find_unique(
        &self,
        filter: &Filter,
        select: Option<&Selection>,
    ) -> AppResult<Option<Record>> {
        self.inner.find_unique(filter, select).await
    }

    async fn find_first(&self, args: &FindArgs) -> AppResult<Option<Record>> {
        Ok(self.find_with_relations(args, true).await?.into_iter().next())
    }

    async fn find_many(&self, args: &FindArgs) -> AppResult<Vec<Record>> {
        self.find_with_relations(args, false).await
    }

    async fn count(&self, filter: Option<&Filter>) -> AppResult<u64> {
        self.inner.count(filter).await
    }

    async fn create(&self, data: Record) -> AppResult<Record> {
        self.inner.create(data).await
    }

    async fn create_many(&self, data: Vec<Record>) -> AppResult<BatchCount> {
        self.inner.create_many(data).await
    }

    async fn update(&self, filter: &Filter, data: Record) -> AppResult<Record> {
        self.inner.update(filter, data).await
    }

    async fn update_many(&self, filter: &Filter, data: Record) -> AppResult<BatchCount> {
        self.inner.update_many(filter, data).await
    }

    async fn upsert(
        &self,
        filter: &Filter,
        create: Record,
        update: Record,
    ) -> AppResult<Record> {
        self.inner.upsert(filter, create, update).await
    }

    async fn delete(&self, filter: &Filter) -> AppResult<Record> {
        self.inner.delete(filter).await
    }

    async fn delete_many(&self, filter: &Filter) -> AppResult<BatchCount> {
        self.inner.delete_many(filter).await
    }
}
