//! `cellio` - a terminal host for the on-device chat assistant
//!
//! Plays the presentation layer: it appends user messages, triggers
//! generation and shows a typing indicator until the reply arrives.

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tracing_subscriber::EnvFilter;

use cellio_core::session::{SessionRepository, DEFAULT_SESSION_TITLE};
use cellio_core::{Config, JsonFileStore, SessionId};

use crate::cli::{Cli, Commands, ConfigCommand, SessionCommand};

mod chat;
mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load_or_default().context("Failed to load configuration")?,
    };
    init_logging(&config);

    match cli.command {
        None => chat::run(&config, None).await?,
        Some(Commands::Chat { session }) => {
            let session = session.as_deref().map(parse_session_id).transpose()?;
            chat::run(&config, session).await?;
        }
        Some(Commands::Session { cmd }) => handle_session_command(&cmd, &config).await?,
        Some(Commands::Config { cmd }) => handle_config_command(&cmd, &config)?,
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_session_id(id: &str) -> Result<SessionId> {
    id.parse()
        .with_context(|| format!("Invalid session id: {}", id))
}

async fn handle_session_command(cmd: &SessionCommand, config: &Config) -> Result<()> {
    let store = JsonFileStore::open(&config.storage.sessions_dir)
        .await
        .context("Failed to open session storage")?;

    match cmd {
        SessionCommand::List => {
            let sessions = store.list_sessions().await;
            if sessions.is_empty() {
                println!("No saved sessions found.");
            } else {
                let blue = Style::new().blue().bold();
                let dim = Style::new().dim();
                println!("{:<36} | {:<24} | {:<5} | {}", blue.apply_to("ID"), "Title", "Time", "Last Message");
                println!("{}", "-".repeat(100));
                for s in sessions {
                    println!(
                        "{:<36} | {:<24} | {:<5} | {}",
                        s.id,
                        s.title,
                        s.last_message_time(),
                        dim.apply_to(s.preview())
                    );
                }
            }
        }
        SessionCommand::New { title } => {
            let session = store.create_session(title.clone()).await?;
            println!("Created session {} ({})", session.id, session.title);
        }
        SessionCommand::Show { id } => {
            let id = parse_session_id(id)?;
            let session = store
                .session(id)
                .await
                .with_context(|| format!("Session not found: {}", id))?;
            println!("{}", Style::new().bold().apply_to(&session.title));
            for message in &session.messages {
                chat::print_message(message);
            }
        }
        SessionCommand::Rename { id, title } => {
            let id = parse_session_id(id)?;
            let title = if title.trim().is_empty() {
                DEFAULT_SESSION_TITLE.to_string()
            } else {
                title.trim().to_string()
            };
            store.rename_session(id, title).await?;
            println!("Session renamed.");
        }
        SessionCommand::Delete { id } => {
            let id = parse_session_id(id)?;
            store.delete_session(id).await?;
            println!("Session deleted.");
        }
    }
    Ok(())
}

fn handle_config_command(cmd: &ConfigCommand, config: &Config) -> Result<()> {
    match cmd {
        ConfigCommand::Path => match Config::default_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("No configuration directory on this platform."),
        },
        ConfigCommand::Show => {
            let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
    }
    Ok(())
}
