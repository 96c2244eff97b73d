use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use souq::auth::{check_password_policy, hash_password};
use souq::config::ServerConfig;
use souq::email::Mailer;
use souq::server::{AppState, create_router};
use souq::store::{SqliteStore, Store, UserStore};
use souq::types::{Role, User, UserStatus};

#[derive(Parser)]
#[command(name = "souq")]
#[command(about = "A storefront and admin API server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        /// Host to bind to (overrides HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides PORT)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Create or upgrade the database schema
    Migrate,

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create an active, verified admin account
    CreateAdmin {
        #[arg(long)]
        email: String,

        #[arg(long)]
        name: String,

        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
}

fn open_store(config: &ServerConfig) -> anyhow::Result<SqliteStore> {
    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
    }
    let store = SqliteStore::new(&config.database_path)?;
    store.initialize()?;
    Ok(store)
}

fn prompt_password(min_length: usize) -> anyhow::Result<String> {
    let password = inquire::Password::new("Password:")
        .with_validator(move |input: &str| {
            Ok(match check_password_policy(input, min_length) {
                Ok(()) => inquire::validator::Validation::Valid,
                Err(message) => inquire::validator::Validation::Invalid(message.into()),
            })
        })
        .prompt()?;
    Ok(password)
}

fn run_create_admin(
    config: &ServerConfig,
    email: &str,
    name: &str,
    password: Option<String>,
) -> anyhow::Result<()> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        bail!("Invalid email address: {email}");
    }
    let name = name.trim();
    if name.is_empty() {
        bail!("Name cannot be empty");
    }

    let min_length = config.auth.password_min_length;
    let password = match password {
        Some(password) => password,
        None => prompt_password(min_length)?,
    };
    if let Err(message) = check_password_policy(&password, min_length) {
        bail!(message);
    }

    let store = open_store(config)?;
    if store.get_user_by_email(&email)?.is_some() {
        bail!("A user with email {email} already exists");
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email,
        name: name.to_string(),
        phone: None,
        password_hash: hash_password(&password)?,
        role: Role::Admin,
        status: UserStatus::Active,
        email_verified: true,
        created_at: now,
        updated_at: now,
    };
    store.create_user(&user)?;

    println!("Created admin '{}' ({})", user.email, user.id);
    Ok(())
}

async fn serve(
    mut config: ServerConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let store: Arc<dyn Store> = Arc::new(open_store(&config)?);
    let mailer = Mailer::from_config(&config)?;

    match store.delete_expired_sessions() {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Expired sessions removed"),
        Err(e) => tracing::warn!("Failed to remove expired sessions: {e}"),
    }

    let addr = config.socket_addr()?;
    let state = Arc::new(AppState::new(store, config, mailer));
    let app = create_router(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("souq=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::from_env()?;

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await?,
        Commands::Migrate => {
            let store = open_store(&config)?;
            let versions = store.applied_migrations()?;
            println!(
                "Database at {} is at schema version {}",
                config.database_path.display(),
                versions.last().copied().unwrap_or_default()
            );
        }
        Commands::Admin { command } => match command {
            AdminCommands::CreateAdmin {
                email,
                name,
                password,
            } => run_create_admin(&config, &email, &name, password)?,
        },
    }

    Ok(())
}
