//! Throne: prediction tracking server
//!
//! Main binary with subcommands:
//! - `serve`: JSON API and static files
//! - `init-db`: Create the SQLite schema
//! - `add-user`: Register a user
//! - `add-stage`: Register a tournament stage

use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use throne_cache::{Caches, MatchAggregator, PasswordDigester, SystemClock, UserDirectory};
use throne_store::{SqliteStore, parse_timestamp};
use throne_web::{AppState, create_router};

#[derive(Parser)]
#[command(name = "throne")]
#[command(about = "Prediction tracking server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON API
    Serve {
        /// SQLite database path
        #[arg(long, env = "THRONE_DB", default_value = "throne.db")]
        db: String,

        /// HTTP listen address
        #[arg(long, env = "THRONE_LISTEN", default_value = "0.0.0.0:8080")]
        listen: String,

        /// Directory with the frontend's static files
        #[arg(long, env = "THRONE_STATIC_DIR")]
        static_dir: Option<String>,

        /// Key mixed into password digests
        #[arg(long, env = "THRONE_DIGEST_KEY")]
        digest_key: String,
    },

    /// Create the database schema if missing
    InitDb {
        /// SQLite database path
        #[arg(long, env = "THRONE_DB", default_value = "throne.db")]
        db: String,
    },

    /// Register a user. The password comes from THRONE_PASSWORD or a prompt.
    AddUser {
        /// SQLite database path
        #[arg(long, env = "THRONE_DB", default_value = "throne.db")]
        db: String,

        /// Key mixed into password digests
        #[arg(long, env = "THRONE_DIGEST_KEY")]
        digest_key: String,

        /// Login name (case-insensitive)
        #[arg(long)]
        login: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Grant match administration
        #[arg(long)]
        admin: bool,
    },

    /// Register a tournament stage
    AddStage {
        /// SQLite database path
        #[arg(long, env = "THRONE_DB", default_value = "throne.db")]
        db: String,

        /// Stage name
        #[arg(long)]
        name: String,

        /// First day, e.g. 2018-03-12T00:00:00Z
        #[arg(long)]
        start: String,

        /// Last day, e.g. 2018-04-07T23:59:59Z
        #[arg(long)]
        end: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "throne=info,throne_web=info,throne_cache=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            db,
            listen,
            static_dir,
            digest_key,
        } => serve(&db, &listen, static_dir.as_deref(), &digest_key).await,

        Commands::InitDb { db } => {
            open_store(&db)?;
            info!(db = %db, "database ready");
            Ok(())
        }

        Commands::AddUser {
            db,
            digest_key,
            login,
            name,
            admin,
        } => add_user(&db, &digest_key, &login, &name, admin).await,

        Commands::AddStage {
            db,
            name,
            start,
            end,
        } => add_stage(&db, &name, &start, &end).await,
    }
}

fn open_store(db: &str) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(db).map_err(|e| miette::miette!("{}", e))?;
    Ok(Arc::new(store))
}

async fn serve(db: &str, listen: &str, static_dir: Option<&str>, digest_key: &str) -> Result<()> {
    let store = open_store(db)?;
    let state = AppState::new(
        store,
        Arc::new(SystemClock),
        PasswordDigester::new(digest_key),
    );
    let router = create_router(state, static_dir);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    info!(listen = %listen, db = %db, "throne listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    Ok(())
}

/// Get the password from env var or interactive prompt.
fn get_password() -> Result<String> {
    if let Ok(password) = std::env::var("THRONE_PASSWORD") {
        return Ok(password);
    }

    eprint!("Password: ");
    rpassword::read_password().map_err(|e| miette::miette!("failed to read password: {}", e))
}

async fn add_user(db: &str, digest_key: &str, login: &str, name: &str, admin: bool) -> Result<()> {
    let store = open_store(db)?;
    let password = get_password()?;
    let users = UserDirectory::new(store, &Caches::new(), PasswordDigester::new(digest_key));

    let user = users
        .add_user(login, name, &password, admin)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Added user {} (id {})", user.login, user.id);
    Ok(())
}

async fn add_stage(db: &str, name: &str, start: &str, end: &str) -> Result<()> {
    let start = parse_timestamp(start).map_err(|e| miette::miette!("{}", e))?;
    let end = parse_timestamp(end).map_err(|e| miette::miette!("{}", e))?;

    let store = open_store(db)?;
    let aggregator = MatchAggregator::new(store, &Caches::new(), Arc::new(SystemClock));
    let stage = aggregator
        .add_stage(name, start, end)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Added stage {} (id {})", stage.name, stage.id);
    Ok(())
}
