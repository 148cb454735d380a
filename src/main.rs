use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use feedgen::config::{parse_interval, Config};
use feedgen::feed::{FeedError, FeedFormat, FeedRequest, FeedService};
use feedgen::ingest::Ingestor;
use feedgen::scrape::{spawn_poller, PageFetcher, RequestIds, Scraper};
use feedgen::storage::{Database, DatabaseError};

#[derive(Parser, Debug)]
#[command(
    name = "feedgen",
    version,
    about = "Turns catalog release announcements into subscribable feeds"
)]
struct Args {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, value_name = "FILE", default_value = "feedgen.toml")]
    config: PathBuf,

    /// SQLite database path, overrides the config file
    #[arg(long, value_name = "FILE")]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the release list until interrupted
    Poll {
        /// Time between polls, e.g. 30m or 6h
        #[arg(long, value_parser = parse_interval)]
        interval: Option<Duration>,
    },
    /// Fetch and store every series with an id in START..END
    Populate { start: u64, end: u64 },
    /// Create (or look up) the feed for a set of series titles or ids
    CreateFeed {
        #[arg(long, value_enum, default_value_t = FeedFormat::Json)]
        format: FeedFormat,
        #[arg(required = true, value_name = "ENTRY")]
        entries: Vec<String>,
    },
    /// Render a feed by fingerprint
    ViewFeed {
        fingerprint: String,
        /// Render in this format instead of the one the feed was created with
        #[arg(long, value_enum)]
        format: Option<FeedFormat>,
    },
}

fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_database(path: &str) -> Result<Database> {
    match Database::open(path).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database '{}': {}", path, e)),
    }
}

fn build_scraper(config: &Config) -> Result<Scraper> {
    let client = PageFetcher::build_client(&config.user_agent)
        .context("Failed to build HTTP client")?;
    let fetcher = PageFetcher::new(
        client,
        config.retry_policy(),
        config.request_timeout(),
        RequestIds::new(),
    );
    Ok(Scraper::new(fetcher, config.base_url()?))
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, shutting down");
                token.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    init_tracing(&config.log_filter);

    let db = open_database(&config.database_path).await?;

    match args.command {
        Command::Poll { interval } => {
            let interval = interval.unwrap_or_else(|| config.poll_interval());
            let scraper = Arc::new(build_scraper(&config)?);
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let batches = spawn_poller(Arc::clone(&scraper), interval, cancel.clone());
            let ingestor = Ingestor::new(db, scraper, config.batch_options());
            ingestor.run(batches, cancel).await;
        }
        Command::Populate { start, end } => {
            if start >= end {
                anyhow::bail!("START must be lower than END (got {start}..{end})");
            }
            let scraper = Arc::new(build_scraper(&config)?);
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let ingestor = Ingestor::new(db, scraper, config.batch_options());
            let stored = ingestor
                .populate(start..end, &cancel)
                .await
                .context("Failed to populate series")?;
            println!("Stored {stored} new series");
        }
        Command::CreateFeed { format, entries } => {
            let service = FeedService::new(db, config.base_url()?, config.feed_link.clone());
            match service.create_feed(&FeedRequest::new(entries, format)).await {
                Ok(record) => println!("{}", record.fingerprint),
                Err(FeedError::NotFound) => {
                    eprintln!("Error: none of the given titles or ids match a known series");
                    std::process::exit(1);
                }
                Err(e) => return Err(e).context("Failed to create feed"),
            }
        }
        Command::ViewFeed {
            fingerprint,
            format,
        } => {
            let service = FeedService::new(db, config.base_url()?, config.feed_link.clone());
            match service.view_feed(&fingerprint, format).await {
                Ok(rendered) => println!("{}", rendered.body),
                Err(FeedError::NotFound) => {
                    eprintln!("Error: no feed with fingerprint '{fingerprint}'");
                    std::process::exit(1);
                }
                Err(e) => return Err(e).context("Failed to render feed"),
            }
        }
    }

    Ok(())
}
