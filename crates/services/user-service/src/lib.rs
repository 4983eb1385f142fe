//! User Service Library
//!
//! User management on top of the generic repository layer. The store
//! behind it (SeaORM or in-memory) is chosen by configuration; the
//! service code does not change between them.

pub mod config;
pub mod infra;
pub mod repository;
pub mod service;

use std::error::Error;

use tracing::info;

use common::AppError;
use domain::CreateUser;
use ::repository::{Backend, QueryOptions};

use crate::config::UserServiceConfig;
use crate::infra::{build_factory, Database, Persistence, UnitOfWork};
use crate::service::{UserManager, UserService};

/// Migration action type.
#[derive(Debug, Clone, Copy)]
pub enum MigrateAction {
    Up,
    Down,
    Status,
    Fresh,
}

/// User management action type.
#[derive(Debug, Clone)]
pub enum UserAction {
    Create { email: String, name: Option<String> },
    Get { id: i32 },
    Find { email: String },
    List { page: u64, limit: Option<u64> },
}

/// Run migrations (for CLI commands).
pub async fn run_migrations(
    config: &UserServiceConfig,
    action: MigrateAction,
) -> Result<(), Box<dyn Error>> {
    if config.repository.backend.parse::<Backend>()? == Backend::Memory {
        info!("In-memory backend has no schema to migrate");
        return Ok(());
    }

    let db = Database::connect_without_migrations(&config.database).await?;

    match action {
        MigrateAction::Up => {
            db.run_migrations().await?;
            info!("Migrations applied successfully");
        }
        MigrateAction::Down => {
            db.rollback_migration().await?;
            info!("Rolled back last migration");
        }
        MigrateAction::Status => {
            let status = db.migration_status().await?;
            for (name, applied) in status {
                let marker = if applied { "[x]" } else { "[ ]" };
                println!("{} {}", marker, name);
            }
        }
        MigrateAction::Fresh => {
            db.fresh_migrations().await?;
            info!("Database reset and migrations applied");
        }
    }

    Ok(())
}

/// Build the user service for `config`.
pub async fn user_service(config: &UserServiceConfig) -> Result<UserManager, AppError> {
    let factory = build_factory(config).await?;
    let persistence = Persistence::new(factory, config.repository.default_limit);
    Ok(UserManager::new(persistence.users()))
}

/// Run one user management action and print the result as JSON.
pub async fn run_user_action(
    config: &UserServiceConfig,
    action: UserAction,
) -> Result<(), Box<dyn Error>> {
    let service = user_service(config).await?;

    let output = match action {
        UserAction::Create { email, name } => {
            let user = service
                .create_user(CreateUser { email, name })
                .await?;
            serde_json::to_string_pretty(&user)?
        }
        UserAction::Get { id } => serde_json::to_string_pretty(&service.get_user(id).await?)?,
        UserAction::Find { email } => {
            serde_json::to_string_pretty(&service.get_user_by_email(&email).await?)?
        }
        UserAction::List { page, limit } => {
            let mut options = QueryOptions::new().page(page);
            if let Some(limit) = limit {
                options = options.limit(limit);
            }
            serde_json::to_string_pretty(&service.list_users(options).await?)?
        }
    };

    println!("{}", output);
    Ok(())
}
