//! Taskflow server
//!
//! Multi-user task tracker exposing projects, tasks, tags, comments and
//! attachments over a REST API backed by SQLite.

use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskflow::api::{self, ApiSettings, ApiState};
use taskflow::blob::FsBlobStore;
use taskflow::cli::{Cli, Command, ServeArgs, UserCommand};
use taskflow::config::Config;
use taskflow::db::Database;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let (mut config, config_path_used) = Config::discover(cli.config.as_deref().map(Path::new))?;

    // Override paths from CLI arguments
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.into();
    }
    if let Some(media_dir) = &cli.media_dir {
        config.server.media_dir = media_dir.into();
    }

    match cli.command {
        None => run_server(config, ServeArgs::default(), config_path_used).await,
        Some(Command::Serve(args)) => run_server(config, args, config_path_used).await,
        Some(Command::User(command)) => run_user_command(&config, command),
    }
}

async fn run_server(
    mut config: Config,
    args: ServeArgs,
    config_path_used: Option<PathBuf>,
) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    // Ensure directories exist
    config.ensure_db_dir()?;
    config.ensure_media_dir()?;

    info!("Starting Taskflow v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path_used {
        info!("Config: {:?}", path);
    }
    info!("Database: {:?}", config.server.db_path);
    info!("Media dir: {:?}", config.server.media_dir);
    info!("Timezone: {}", config.server.timezone);

    // Open database
    let db = Arc::new(Database::open(&config.server.db_path)?);
    info!("Database initialized successfully");

    let blobs = Arc::new(FsBlobStore::new(config.server.media_dir.clone()));
    let settings = ApiSettings::from_config(&config.server)?;
    let state = ApiState::new(db, blobs, settings);

    let addr: SocketAddr = tokio::net::lookup_host((config.server.host.as_str(), config.server.port))
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Cannot resolve host '{}'", config.server.host))?;
    let (shutdown_tx, bound_addr, server) = api::start_server(state, addr).await?;
    info!("API available at http://{}/api/", bound_addr);

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");
    let _ = shutdown_tx.send(());
    server.await?;

    Ok(())
}

fn run_user_command(config: &Config, command: UserCommand) -> Result<()> {
    config.ensure_db_dir()?;
    let db = Database::open(&config.server.db_path)?;

    match command {
        UserCommand::Add { username, email } => {
            let user = db.create_user(&username, &email)?;
            info!(user_id = user.id, username = %user.username, "User created");
            println!("Created user '{}' (id {})", user.username, user.id);
            println!("API token: {}", user.api_token);
        }
        UserCommand::List => {
            let users = db.list_users()?;
            if users.is_empty() {
                println!("No users.");
            }
            for user in users {
                let joined = chrono::DateTime::from_timestamp_millis(user.date_joined)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{:>5}  {:<24} {:<32} {}", user.id, user.username, user.email, joined);
            }
        }
    }

    Ok(())
}
