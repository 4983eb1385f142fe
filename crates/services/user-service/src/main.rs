//! User Service - command line entry point for user management.

use clap::{Parser, Subcommand};

use user_service_lib::config::UserServiceConfig;
use user_service_lib::{MigrateAction, UserAction};

#[derive(Parser)]
#[command(name = "user-service")]
#[command(about = "User management over the repository layer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database migration commands
    Migrate {
        #[command(subcommand)]
        action: MigrateCommands,
    },
    /// User management commands
    User {
        #[command(subcommand)]
        action: UserCommands,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Run pending migrations
    Up,
    /// Rollback last migration
    Down,
    /// Show migration status
    Status,
    /// Reset database and run all migrations
    Fresh,
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Show an active user by ID
    Get { id: i32 },
    /// Show an active user by email
    Find { email: String },
    /// List active users
    List {
        #[arg(long, default_value = "1")]
        page: u64,
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = UserServiceConfig::from_env();
    common::telemetry::init_tracing(&config.service.log_level);

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate { action } => {
            let migrate_action = match action {
                MigrateCommands::Up => MigrateAction::Up,
                MigrateCommands::Down => MigrateAction::Down,
                MigrateCommands::Status => MigrateAction::Status,
                MigrateCommands::Fresh => MigrateAction::Fresh,
            };
            user_service_lib::run_migrations(&config, migrate_action).await?;
        }
        Commands::User { action } => {
            let user_action = match action {
                UserCommands::Create { email, name } => UserAction::Create { email, name },
                UserCommands::Get { id } => UserAction::Get { id },
                UserCommands::Find { email } => UserAction::Find { email },
                UserCommands::List { page, limit } => UserAction::List { page, limit },
            };
            user_service_lib::run_user_action(&config, user_action).await?;
        }
    }

    Ok(())
}
