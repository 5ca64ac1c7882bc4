//! Operator CLI for the event store.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use tracing_subscriber::EnvFilter;

use causeway_events::{ConnectionRegistry, EventStore, PostgresBackend, StoreConfig, DEFAULT_CONNECTION};

#[derive(Parser)]
#[command(name = "causeway", about = "Causeway event store administration")]
#[command(version)]
struct Cli {
    /// Named connection to use
    #[arg(long, global = true, default_value = DEFAULT_CONNECTION)]
    connection: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the events table and indexes if they are missing
    Migrate,

    /// Drop and recreate the events table. Destroys every event.
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Walk the log in replay order and report page sizes
    Replay {
        /// Events per page (defaults to REPLAY_PAGE_SIZE)
        #[arg(long)]
        page_size: Option<usize>,

        /// Resume after this event id
        #[arg(long)]
        from: Option<String>,
    },

    /// Print event count and the latest event
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = StoreConfig::from_env()?;
    let default_page_size = config.replay_page_size;

    let registry = ConnectionRegistry::new(config);
    let backend = registry
        .backend(&cli.connection)
        .await
        .with_context(|| format!("Failed to connect ({})", cli.connection))?;

    let result = run(cli.command, backend, default_page_size).await;
    registry.close_all().await;
    result
}

async fn run(command: Command, backend: PostgresBackend, default_page_size: usize) -> Result<()> {
    match command {
        Command::Migrate => {
            backend.migrate().await.context("Migration failed")?;
            tracing::info!("Events schema is up to date");
        }

        Command::Reset { yes } => {
            if !yes {
                bail!("Refusing to reset without --yes");
            }
            EventStore::new(backend).reset_store().await?;
            println!("Event store reset.");
        }

        Command::Replay { page_size, from } => {
            let page_size = page_size.unwrap_or(default_page_size);
            let store = EventStore::new(backend);
            let mut pages = store.get_all_events(page_size, from.as_deref());

            let mut page_count = 0usize;
            let mut event_count = 0usize;
            let mut last_id = None;
            while let Some(page) = pages.try_next().await? {
                page_count += 1;
                event_count += page.len();
                last_id = page.last().map(|event| event.id.clone());
                println!("page {page_count}: {} events", page.len());
            }

            println!("{event_count} events in {page_count} pages");
            if let Some(id) = last_id {
                println!("last event: {id}");
            }
        }

        Command::Stats => {
            let store = EventStore::new(backend);
            let count = store.count_events().await?;
            println!("events: {count}");

            match store.latest_event().await? {
                Some(event) => println!(
                    "latest: {} {}/{} at {}",
                    event.id,
                    event.domain,
                    event.event_type,
                    event.created.to_rfc3339()
                ),
                None => println!("latest: none"),
            }
        }
    }

    Ok(())
}
