// ============================================================================
// mneme — memory-augmented assistant CLI
// ============================================================================
// Usage:
//   mneme chat [--user NAME]                Interactive chat with memory
//   mneme stats                             Show memory statistics
//   mneme recall "QUERY" [--user NAME]      Inspect retrieval for a query
//   mneme recent [--limit N]                Show the latest stored messages
//   mneme reindex                           Rebuild the index snapshot
//   mneme export --format json              Export all messages as JSON
// ============================================================================

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

use mneme_core::memory::VectorIndex;
use mneme_core::{
    create_embedding_service, Assistant, ChatClient, Config, MemoryManager, MemoryStats,
    MessageStore, RecallOptions, Role, SessionWindows,
};

/// Memory-augmented conversational assistant
#[derive(Parser)]
#[command(name = "mneme", version, about = "Chat assistant with long-term memory")]
struct Cli {
    /// Data directory (default: ~/.mneme, or MNEME_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat interactively; the assistant remembers across sessions
    Chat {
        /// Name you chat under; memories are personalized per user
        #[arg(long, default_value = "you")]
        user: String,
    },

    /// Show message counts and index state
    Stats,

    /// Run the retrieval pipeline for a query and show the scores
    Recall {
        /// Query text
        query: String,

        /// Requesting user, for the affinity bonus
        #[arg(long, default_value = "you")]
        user: String,

        /// Result count (default: configured k)
        #[arg(long)]
        k: Option<usize>,

        /// Exclude bot replies from the results
        #[arg(long)]
        ignore_bot: bool,
    },

    /// Show the most recent stored messages
    Recent {
        /// How many messages to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Rebuild the index snapshot from stored embeddings
    Reindex,

    /// Export all messages
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::default();
    if let Some(dir) = cli.data_dir {
        config.data_dir = PathBuf::from(dir);
    }
    config.ensure_data_dir()?;

    match cli.command {
        Commands::Chat { user } => cmd_chat(&config, &user).await,
        Commands::Stats => cmd_stats(&config),
        Commands::Recall {
            query,
            user,
            k,
            ignore_bot,
        } => cmd_recall(&config, &query, &user, k, ignore_bot).await,
        Commands::Recent { limit } => cmd_recent(&config, limit),
        Commands::Reindex => cmd_reindex(&config),
        Commands::Export { format } => cmd_export(&config, &format),
    }
}

/// Open the full manager, embedding service included. Commands that only
/// read the store avoid this so they work without an API key.
fn open_manager(config: &Config) -> Result<Arc<MemoryManager>> {
    let store = MessageStore::open(&config.db_path())?;
    let service = create_embedding_service(&config.embedding)?;
    let manager = MemoryManager::open(store, Arc::new(service), config.memory_config())?;
    Ok(Arc::new(manager))
}

async fn cmd_chat(config: &Config, user: &str) -> Result<()> {
    let manager = open_manager(config)?;
    let persister =
        Arc::clone(&manager).spawn_persister(Duration::from_secs(config.snapshot_interval_secs));

    let api_key = config
        .chat
        .api_key
        .clone()
        .ok_or_else(|| anyhow!("No chat API key set (MISTRAL_API_KEY)"))?;
    let chat = ChatClient::new(api_key, config.chat.base_url.clone(), config.chat.model.clone())
        .with_temperature(config.chat.temperature);
    let sessions = SessionWindows::new(config.window_exchanges, config.max_sessions);
    let assistant = Assistant::new(Arc::clone(&manager), sessions, chat);

    println!(
        "Mneme, chatting as {}. Commands: !stats, !reset, !switch <model>, !quit",
        user
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}> ", user);
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('!') {
            if handle_command(&assistant, user, command).await? {
                break;
            }
            continue;
        }

        match assistant.respond(user, line).await {
            Ok(reply) => println!("mneme> {}", reply),
            Err(e) => {
                error!("Failed to process message: {:#}", e);
                println!("mneme> An error occurred while processing your message.");
            }
        }
    }

    persister.abort();
    manager.flush().await?;
    println!("Goodbye.");
    Ok(())
}

/// Handle a `!` command inside the chat loop; returns true to quit
async fn handle_command(assistant: &Assistant, user: &str, command: &str) -> Result<bool> {
    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("quit") | Some("exit") => return Ok(true),

        Some("stats") => {
            let stats = assistant.memory().stats().await?;
            println!(
                "Messages: {} total ({} user, {} bot)",
                stats.total_messages, stats.user_messages, stats.bot_messages
            );
            println!(
                "Index:    {} vectors of dimension {}",
                stats.indexed_vectors, stats.dimension
            );
            println!(
                "Session:  {} turn(s) buffered",
                assistant.sessions().session_len(user)
            );
            println!("Model:    {}", assistant.active_model().await);
        }

        Some("reset") | Some("new") => {
            if assistant.sessions().reset(user) {
                println!("Short-term window cleared.");
            } else {
                println!("No active session to clear.");
            }
        }

        Some("switch") => match parts.next() {
            Some(model) => {
                assistant.switch_model(model).await;
                println!("Switched to {}.", model);
            }
            None => println!("Usage: !switch <model>"),
        },

        _ => println!("Unknown command. Available: !stats, !reset, !switch <model>, !quit"),
    }
    Ok(false)
}

fn cmd_stats(config: &Config) -> Result<()> {
    let store = MessageStore::open(&config.db_path())?;

    println!("=== Mneme Memory Stats ===");
    println!("Database: {}", config.db_path().display());
    println!();
    println!("Messages: {} total", store.count()?);
    println!("  {:6} {}", "user", store.count_by_role(Role::User)?);
    println!("  {:6} {}", "bot", store.count_by_role(Role::Bot)?);

    let index_path = config.index_path();
    match VectorIndex::load(&index_path) {
        Ok(index) => println!(
            "Index:    {} vectors of dimension {}",
            index.len(),
            index.dimension()
        ),
        Err(_) => println!(
            "Index:    no snapshot at {} (rebuilt on next chat)",
            index_path.display()
        ),
    }

    Ok(())
}

async fn cmd_recall(
    config: &Config,
    query: &str,
    user: &str,
    k: Option<usize>,
    ignore_bot: bool,
) -> Result<()> {
    let manager = open_manager(config)?;
    let options = RecallOptions { k, ignore_bot };
    let results = manager.recall_scored(query, user, options).await?;

    if results.is_empty() {
        println!("No relevant memories found.");
        return Ok(());
    }

    println!(
        "{:>6}  {:>10}  {:>10}  {:<12}  {:<6}  {}",
        "SLOT", "RAW", "EFFECTIVE", "AUTHOR", "ROLE", "CONTENT"
    );
    println!("{}", "-".repeat(80));

    for candidate in &results {
        let content: String = candidate.record.content.chars().take(48).collect();
        println!(
            "{:>6}  {:>10.4}  {:>10.4}  {:<12}  {:<6}  {}",
            candidate.record.slot,
            candidate.raw_distance,
            candidate.effective_distance,
            candidate.record.author,
            candidate.record.role.as_str(),
            content
        );
    }

    println!("\nTotal: {} message(s)", results.len());
    Ok(())
}

fn cmd_recent(config: &Config, limit: usize) -> Result<()> {
    let store = MessageStore::open(&config.db_path())?;
    let messages = store.recent(limit)?;

    if messages.is_empty() {
        println!("No messages stored yet.");
        return Ok(());
    }

    println!(
        "{:<22}  {:<12}  {:<6}  {}",
        "TIME", "AUTHOR", "ROLE", "CONTENT"
    );
    println!("{}", "-".repeat(80));

    for message in &messages {
        let content: String = message.content.chars().take(48).collect();
        println!(
            "{:<22}  {:<12}  {:<6}  {}",
            format_timestamp(message.timestamp),
            message.author,
            message.role.as_str(),
            content
        );
    }

    Ok(())
}

fn cmd_reindex(config: &Config) -> Result<()> {
    let store = MessageStore::open(&config.db_path())?;
    let rows = store.embeddings_in_slot_order()?;

    let dimension = rows
        .first()
        .map(|(_, embedding)| embedding.len())
        .unwrap_or(config.embedding.dimension);

    let mut index = VectorIndex::new(dimension);
    for (slot, embedding) in &rows {
        let assigned = index.add(embedding)?;
        if assigned != *slot {
            anyhow::bail!("Stored slots are not contiguous (slot {} assigned {})", slot, assigned);
        }
    }

    index.save(&config.index_path())?;
    println!(
        "Rebuilt index: {} vectors of dimension {} at {}",
        index.len(),
        dimension,
        config.index_path().display()
    );
    Ok(())
}

fn cmd_export(config: &Config, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let store = MessageStore::open(&config.db_path())?;
    let messages = store.all()?;

    let (indexed_vectors, dimension) = match VectorIndex::load(&config.index_path()) {
        Ok(index) => (index.len(), index.dimension()),
        Err(_) => (0, 0),
    };
    let stats = MemoryStats {
        total_messages: store.count()?,
        user_messages: store.count_by_role(Role::User)?,
        bot_messages: store.count_by_role(Role::Bot)?,
        indexed_vectors,
        dimension,
    };

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": stats,
        "messages": messages,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}
