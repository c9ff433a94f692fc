//! Badge Replay - run events and backfills through the badge engine
//!
//! Feeds newline-delimited `DomainEvent` JSON through an engine backed by the
//! in-memory store and prints every grant as a JSON line. Progress can be
//! carried between runs with a state snapshot.
//!
//! Usage:
//!   badge-replay run --input events.jsonl --state progress.json
//!   badge-replay backfill --badge fashionista --user 0xabc... --payload purchases.json
//!   badge-replay badges --user 0xabc... --state progress.json
//!   badge-replay catalog
//!
//! Environment variables:
//!   BADGE_CONFIG - Engine configuration YAML
//!   BADGE_STATE - Progress snapshot file (read at start, written at exit)
//!   BADGE_RARITIES - JSON object mapping item urn to rarity
//!   RUST_LOG - Log filter (default: info,badge_engine=debug)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use badge_core::{BadgeCatalog, BadgeId, DomainEvent};
use badge_engine::{
    BadgeEngine, EngineConfig, InMemoryCache, InMemoryProgressStore, StaticItemLookup,
};

#[derive(Parser, Debug)]
#[command(name = "badge-replay")]
#[command(about = "Replay events and backfills through the badge engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dispatch newline-delimited events and print the grants
    Run {
        /// Events file, `-` for stdin
        #[arg(long, default_value = "-")]
        input: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Merge a historical payload for one user and badge
    Backfill {
        /// Badge id, e.g. `social-butterfly`
        #[arg(long)]
        badge: String,

        /// User wallet address
        #[arg(long)]
        user: String,

        /// JSON payload file
        #[arg(long)]
        payload: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Print a user's achieved and in-progress badges
    Badges {
        /// User wallet address
        #[arg(long)]
        user: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Print the badge catalog
    Catalog,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Engine configuration YAML
    #[arg(long, env = "BADGE_CONFIG")]
    config: Option<PathBuf>,

    /// Progress snapshot, loaded at start and saved at exit
    #[arg(long, env = "BADGE_STATE")]
    state: Option<PathBuf>,

    /// Item rarity table (JSON object of urn to rarity)
    #[arg(long, env = "BADGE_RARITIES")]
    rarities: Option<PathBuf>,
}

/// Engine plus the store it writes to.
struct Replay {
    engine: BadgeEngine,
    store: Arc<InMemoryProgressStore>,
    state: Option<PathBuf>,
}

impl Replay {
    fn load(common: CommonArgs) -> Result<Self> {
        let config = match &common.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };

        let store = Arc::new(InMemoryProgressStore::new());
        if let Some(path) = common.state.as_deref().filter(|p| p.exists()) {
            let raw = read(path)?;
            let rows = store
                .import_json(&raw)
                .with_context(|| format!("invalid snapshot {}", path.display()))?;
            info!(rows, path = %path.display(), "Loaded progress snapshot");
        }

        let lookup = match &common.rarities {
            Some(path) => StaticItemLookup::from_json(&read(path)?)
                .with_context(|| format!("invalid rarity table {}", path.display()))?,
            None => StaticItemLookup::default(),
        };

        let engine = BadgeEngine::new(
            config.clone(),
            Arc::new(BadgeCatalog::standard()),
            store.clone(),
            Arc::new(InMemoryCache::new(&config.cache)),
            Arc::new(lookup),
        )?;

        Ok(Self {
            engine,
            store,
            state: common.state,
        })
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.state else {
            return Ok(());
        };
        let snapshot = self.store.export_json()?;
        std::fs::write(path, snapshot)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        info!(rows = self.store.len(), path = %path.display(), "Saved progress snapshot");
        Ok(())
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

async fn replay_lines<R: AsyncBufRead + Unpin>(replay: &Replay, reader: R) -> Result<()> {
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let mut rejected = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: DomainEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                rejected += 1;
                warn!(line = line_no, error = %e, "Skipping malformed event");
                continue;
            }
        };
        for grant in replay.engine.process_event(&event).await.unwrap_or_default() {
            println!("{}", serde_json::to_string(&grant)?);
        }
    }

    let stats = replay.engine.stats();
    info!(
        lines = line_no,
        rejected,
        routed = stats.routed,
        grants = stats.grants,
        observer_failures = stats.observer_failures,
        fetch_failures = stats.fetch_failures,
        "Replay finished"
    );
    Ok(())
}

async fn run(input: &str, common: CommonArgs) -> Result<()> {
    let replay = Replay::load(common)?;
    if input == "-" {
        replay_lines(&replay, BufReader::new(tokio::io::stdin())).await?;
    } else {
        let file = tokio::fs::File::open(input)
            .await
            .with_context(|| format!("failed to open {}", input))?;
        replay_lines(&replay, BufReader::new(file)).await?;
    }
    replay.save()
}

async fn backfill(badge: &str, user: &str, payload: &Path, common: CommonArgs) -> Result<()> {
    let replay = Replay::load(common)?;
    let payload: serde_json::Value = serde_json::from_str(&read(payload)?)
        .with_context(|| format!("payload {} is not JSON", payload.display()))?;
    let row = replay.engine.backfill(badge, user, &payload).await?;
    println!("{}", serde_json::to_string_pretty(&row)?);
    replay.save()
}

async fn badges(user: &str, common: CommonArgs) -> Result<()> {
    let replay = Replay::load(common)?;
    let summary = replay.engine.user_badges(user).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn catalog() -> Result<()> {
    let catalog = BadgeCatalog::standard();
    for id in BadgeId::ALL {
        if let Some(definition) = catalog.get(id) {
            let tiers: Vec<String> = definition
                .tiers()
                .iter()
                .map(|t| format!("{}={}", t.tier_name, t.criteria.steps))
                .collect();
            println!(
                "{:<22} {:<10} steps={:<6} {}",
                definition.id.as_str(),
                format!("{:?}", definition.category),
                definition.criteria.steps,
                tiers.join(" ")
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries results
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,badge_engine=debug")
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { input, common } => run(&input, common).await,
        Command::Backfill {
            badge,
            user,
            payload,
            common,
        } => backfill(&badge, &user, &payload, common).await,
        Command::Badges { user, common } => badges(&user, common).await,
        Command::Catalog => catalog(),
    }
}
