//! Adapter factory wiring.
//!
//! Binds the `User` and `Post` entity names to the configured store and
//! registers the relations between them.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use common::AppResult;
use domain::{POST_ENTITY, USER_ENTITY};
use repository::{
    AdapterFactory, Backend, DatabaseDelegate, MemoryStore, Relation, SeaOrmStore, TableSchema,
};

use super::db::Database;
use crate::config::UserServiceConfig;
use crate::repository::entities::{post, user};

/// Build the adapter factory for the configured backend.
///
/// For `sea-orm` this connects and applies pending migrations.
pub async fn build_factory(config: &UserServiceConfig) -> AppResult<AdapterFactory> {
    let backend: Backend = config.repository.backend.parse()?;
    tracing::info!(backend = %backend, "building adapter factory");

    let factory = match backend {
        Backend::SeaOrm => {
            let db = Database::connect(&config.database).await?;
            sea_orm_factory(db.get_connection())
        }
        Backend::Memory => memory_factory(),
    };

    Ok(factory)
}

/// Factory over a SeaORM connection whose schema is already migrated
pub fn sea_orm_factory(conn: DatabaseConnection) -> AdapterFactory {
    let store = SeaOrmStore::new(conn)
        .bind::<user::Entity, user::ActiveModel>(USER_ENTITY)
        .bind::<post::Entity, post::ActiveModel>(POST_ENTITY);
    with_relations(AdapterFactory::new(Arc::new(store)))
}

/// Factory over a fresh in-memory store mirroring the SQL schema
pub fn memory_factory() -> AdapterFactory {
    let store = MemoryStore::new()
        .table(TableSchema::new(USER_ENTITY).unique("email"))
        .table(
            TableSchema::new(POST_ENTITY)
                .default_value("published", false)
                .default_value("view_count", 0)
                .timestamps("created_at", "updated_at"),
        );
    with_relations(AdapterFactory::new(Arc::new(store)))
}

fn with_relations(factory: AdapterFactory) -> AdapterFactory {
    factory
        .with_relation(USER_ENTITY, Relation::has_many("posts", POST_ENTITY, "author_id"))
        .with_relation(POST_ENTITY, Relation::belongs_to("author", USER_ENTITY, "author_id"))
}

/// Named shortcuts for the entities this service binds.
pub trait AdapterShortcuts {
    fn create_user_adapter(&self) -> AppResult<Arc<dyn DatabaseDelegate>>;

    fn create_post_adapter(&self) -> AppResult<Arc<dyn DatabaseDelegate>>;
}

impl AdapterShortcuts for AdapterFactory {
    fn create_user_adapter(&self) -> AppResult<Arc<dyn DatabaseDelegate>> {
        self.create_adapter(USER_ENTITY)
    }

    fn create_post_adapter(&self) -> AppResult<Arc<dyn DatabaseDelegate>> {
        self.create_adapter(POST_ENTITY)
    }
}
