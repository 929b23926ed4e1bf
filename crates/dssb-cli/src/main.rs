//! DSSB CLI - query DSS servers and manage the local server list

use anyhow::Context;
use clap::{Parser, Subcommand};
use dssb_core::{DssbConfig, MemoryCredentials, ServerKey, ServerSnapshot, ServerSource};
use dssb_discovery::{DiscoveryEvent, ServerBrowser};
use dssb_protocol::{icon_file_name, DssClient};
use dssb_store::ServerRecord;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dssb")]
#[command(about = "DSS game server browser")]
struct Args {
    /// Configuration file (JSON)
    #[arg(long, default_value = "dssb.json")]
    config: PathBuf,

    /// Data directory, overrides the configuration file
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Query one server directly
    Query {
        /// Target as ip:port
        target: ServerKey,

        #[command(flatten)]
        fields: Fields,

        /// Save the server icon into this directory
        #[arg(long, value_name = "DIR")]
        icon: Option<PathBuf>,
    },

    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that work on the local server store
#[derive(Subcommand)]
enum StoreCommand {
    /// List stored servers
    List {
        #[arg(long)]
        source: Option<ServerSource>,
    },

    /// Search stored servers by name, info or ip
    Search { text: String },

    /// Add a server by hand
    Add {
        target: ServerKey,

        #[arg(long)]
        website: Option<String>,

        /// Store without querying first
        #[arg(long)]
        no_validate: bool,
    },

    /// Remove a stored server
    Remove { target: ServerKey },

    /// Toggle a server's favorite mark
    Favorite { target: ServerKey },

    /// Fetch the remote list and validate every entry
    Refresh,

    /// Re-query every stored server
    Revalidate,

    /// Remove dynamic servers that keep failing
    Cleanup {
        #[arg(long)]
        max_failures: Option<u32>,
    },

    /// Refresh periodically until interrupted
    Watch,

    /// Show store statistics
    Stats,
}

/// Fields to print for `query`. None selected prints everything.
#[derive(clap::Args)]
struct Fields {
    #[arg(long)]
    name: bool,
    #[arg(long)]
    info: bool,
    #[arg(long)]
    news: bool,
    #[arg(long)]
    players: bool,
    #[arg(long)]
    max_players: bool,
}

impl Fields {
    fn print(&self, snapshot: &ServerSnapshot) {
        let all = !(self.name || self.info || self.news || self.players || self.max_players);
        if all || self.name {
            println!("{}", snapshot.name);
        }
        if all || self.info {
            println!("{}", snapshot.info);
        }
        if all || self.news {
            println!("{}", snapshot.news);
        }
        if all || self.players {
            println!("{}", snapshot.players);
        }
        if all || self.max_players {
            println!("{}", snapshot.max_players);
        }
    }
}

fn print_record(record: &ServerRecord) {
    let players = match (record.players, record.max_players) {
        (Some(p), Some(m)) => format!("{p}/{m}"),
        _ => "-".to_string(),
    };
    let mut flags = String::new();
    if record.important {
        flags.push('!');
    }
    if record.trusted {
        flags.push('*');
    }
    println!(
        "{:<24} {:<8} {:>9} {:<2} {}",
        record.key().to_string(),
        record.source.as_str(),
        players,
        flags,
        record.name.as_deref().unwrap_or("(not queried)")
    );
}

async fn query(
    config: &DssbConfig,
    target: ServerKey,
    fields: Fields,
    icon: Option<PathBuf>,
) -> anyhow::Result<()> {
    let client = DssClient::new(&config.query)?;
    let snapshot = client
        .query(&target.ip, target.port, config.query.timeout)
        .await
        .with_context(|| format!("failed to query {target}"))?;

    fields.print(&snapshot);

    if let Some(dir) = icon {
        if snapshot.icon.is_empty() {
            tracing::warn!(server = %target, "server has no icon");
        } else {
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(icon_file_name(&target, &snapshot.icon));
            std::fs::write(&path, &snapshot.icon)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "saved icon");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = DssbConfig::load(&args.config)?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    match args.command {
        Command::Query {
            target,
            fields,
            icon,
        } => query(&config, target, fields, icon).await,
        Command::Store(command) => run(config, command).await,
    }
}

async fn run(config: DssbConfig, command: StoreCommand) -> anyhow::Result<()> {
    let browser = ServerBrowser::open(config, Arc::new(MemoryCredentials::new()))?;

    match command {
        StoreCommand::List { source } => {
            for record in browser.server_list(source).await? {
                print_record(&record);
            }
        }
        StoreCommand::Search { text } => {
            for record in browser.search_servers(&text).await? {
                print_record(&record);
            }
        }
        StoreCommand::Add {
            target,
            website,
            no_validate,
        } => {
            let record = browser
                .add_manual_server(&target, website, !no_validate)
                .await
                .with_context(|| format!("failed to add {target}"))?;
            print_record(&record);
        }
        StoreCommand::Remove { target } => {
            if !browser.remove_server(&target).await? {
                anyhow::bail!("server {target} not found");
            }
            println!("removed {target}");
        }
        StoreCommand::Favorite { target } => match browser.toggle_favorite(&target).await? {
            Some(true) => println!("{target} is now a favorite"),
            Some(false) => println!("{target} is no longer a favorite"),
            None => anyhow::bail!("server {target} not found"),
        },
        StoreCommand::Refresh => {
            let summary = browser.refresh_dynamic_servers().await?;
            println!(
                "{} servers: {} online, {} failed",
                summary.total, summary.succeeded, summary.failed
            );
        }
        StoreCommand::Revalidate => {
            let (succeeded, failed) = browser.refresh_all_servers().await?;
            println!("{succeeded} online, {failed} failed");
        }
        StoreCommand::Cleanup { max_failures } => {
            let removed = match max_failures {
                Some(max_failures) => browser.service().cleanup(max_failures).await?,
                None => browser.cleanup_dead_servers().await?,
            };
            for key in &removed {
                println!("removed {key}");
            }
        }
        StoreCommand::Watch => {
            let mut events = browser.subscribe();
            browser.start_auto_refresh().await;

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(DiscoveryEvent::FetchCompleted(summary)) => println!(
                            "{} servers: {} online, {} failed",
                            summary.total, summary.succeeded, summary.failed
                        ),
                        Ok(DiscoveryEvent::ServerValidated { key, name, players, max_players }) => {
                            println!("{key} {name} {players}/{max_players}")
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "event stream lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("interrupted, stopping auto-refresh");
                        break;
                    }
                }
            }

            browser.stop_auto_refresh().await;
        }
        StoreCommand::Stats => {
            let stats = browser.statistics().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
