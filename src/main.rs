//! # Knowbase CLI
//!
//! Operate the knowledge base from the shell: pick a storage backend, then
//! list, search, and edit entries through whichever one is active.
//!
//! Usage:
//!   knowbase status                          # Active provider + reachability
//!   knowbase use vector                      # Switch backend (falls back to local)
//!   knowbase search "reset password"         # Ranked results
//!   knowbase add -q "Question?" -a "Answer"  # Store an entry
//!   knowbase chain "create order"            # Follow API entries via next_step
//!   knowbase --init-config                   # Write ~/.knowbase/config.toml

use anyhow::Result;
use clap::{Parser, Subcommand};
use knowbase_core::payload::EntryPayload;
use knowbase_core::state::StateStore;
use knowbase_core::{EntryType, KnowbaseConfig, KnowledgeEntry, ProviderType};
use knowbase_providers::api_call::DEFAULT_CHAIN_DEPTH;
use knowbase_providers::{ApiCaller, ProviderManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "knowbase",
    version,
    about = "📚 Knowbase — one knowledge base, three storage backends"
)]
struct Cli {
    /// Config file (default: ~/.knowbase/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,

    /// Overwrite an existing config (used with --init-config)
    #[arg(long)]
    force: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Defaults to `status`
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show the active provider and which backends are reachable
    Status,
    /// Switch the active provider (local, search, vector)
    Use { provider: ProviderType },
    /// List stored entries
    List {
        /// Only entries owned by this owner
        #[arg(long)]
        owner: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Search entries
    Search {
        query: String,
        /// Hide results scoring below this (0-100)
        #[arg(long, default_value = "0")]
        min_score: u8,
        #[arg(long)]
        json: bool,
    },
    /// Show one entry, decoding table/API answers
    Show { id: String },
    /// Add an entry (duplicate questions are ignored)
    Add(EntryArgs),
    /// Replace an entry by id (adds it when the id is unknown)
    Update {
        #[arg(long)]
        id: String,
        #[command(flatten)]
        entry: EntryArgs,
    },
    /// Delete an entry by id
    Delete { id: String },
    /// Execute the call stored in an API entry
    Call {
        id: String,
        /// Bearer token for the Authorization header
        #[arg(long)]
        token: Option<String>,
    },
    /// Find the API entry for a query and follow its next steps
    Chain {
        query: String,
        #[arg(long, default_value_t = DEFAULT_CHAIN_DEPTH)]
        max_depth: usize,
    },
}

#[derive(clap::Args)]
struct EntryArgs {
    #[arg(short, long)]
    question: String,
    #[arg(short, long)]
    answer: String,
    /// Comma-separated keywords
    #[arg(short, long, value_delimiter = ',')]
    keywords: Vec<String>,
    /// text, table, or api
    #[arg(long = "type", default_value = "text")]
    entry_type: EntryType,
    #[arg(long)]
    owner: Option<String>,
}

impl EntryArgs {
    fn into_entry(self) -> Result<KnowledgeEntry> {
        let mut entry = KnowledgeEntry::new(self.question, self.answer)
            .with_keywords(self.keywords.into_iter().map(|k| k.trim().to_string()))
            .with_type(self.entry_type);
        entry.owner = self.owner;
        entry.validate()?;
        // Structured answers must decode before they are stored.
        entry.payload()?;
        Ok(entry)
    }
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: Option<&Path>) -> Result<KnowbaseConfig> {
    let config = match path {
        Some(path) => KnowbaseConfig::load_from(path)?,
        None => KnowbaseConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "knowbase=debug,knowbase_core=debug,knowbase_providers=debug"
    } else {
        "knowbase=info,knowbase_core=info,knowbase_providers=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    // --init-config: write defaults and exit
    if cli.init_config {
        let path = cli.config.clone().unwrap_or_else(KnowbaseConfig::default_path);
        if path.exists() && !cli.force {
            println!("⚠️  Config already exists at {} (use --force to overwrite)", path.display());
            return Ok(());
        }
        KnowbaseConfig::default().save_to(&path)?;
        println!("✅ Wrote default config to {}", path.display());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let data_dir = expand_path(&config.data_dir);
    let state = Arc::new(StateStore::open(&data_dir.join("state.db"))?);

    let manager = knowbase_providers::create_manager(&config, state)?;
    manager.initialize().await?;
    let _announce = manager.add_listener(|kind| {
        tracing::info!("📣 Active provider is now '{kind}'");
    });

    run(&config, &manager, cli.command.unwrap_or(Command::Status)).await
}

async fn find_entry(manager: &ProviderManager, id: &str) -> Result<KnowledgeEntry> {
    manager
        .active()
        .load_entries(None)
        .await?
        .into_iter()
        .find(|e| e.id == id)
        .ok_or_else(|| anyhow::anyhow!("no entry with id {id}"))
}

async fn run(config: &KnowbaseConfig, manager: &ProviderManager, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            println!("📚 Knowbase v{}", env!("CARGO_PKG_VERSION"));
            println!("   Active: {}", manager.active_type());
            for (kind, available) in manager.availability().await {
                let mark = if available { "✅" } else { "❌" };
                println!("   {mark} {kind}");
            }
        }
        Command::Use { provider } => {
            let landed = manager.set_provider(provider).await?;
            if landed == provider {
                println!("✅ Now using '{landed}'");
            } else {
                println!("⚠️  '{provider}' is unavailable; using '{landed}'");
            }
        }
        Command::List { owner, json } => {
            let entries = manager.active().load_entries(owner.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    println!("{:<38} [{}] {}", entry.id, entry.entry_type.as_str(), entry.question);
                }
                println!("({} entries via {})", entries.len(), manager.active_type());
            }
        }
        Command::Search { query, min_score, json } => {
            let results: Vec<_> = manager
                .active()
                .search_entries(&query)
                .await
                .into_iter()
                .filter(|r| r.score >= min_score)
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No matches.");
            } else {
                for r in &results {
                    println!("{:>3}  {}", r.score, r.entry.question);
                    println!("     {}", r.entry.answer.lines().next().unwrap_or_default());
                }
            }
        }
        Command::Show { id } => {
            let entry = find_entry(manager, &id).await?;
            println!("Q: {}", entry.question);
            match entry.payload()? {
                EntryPayload::Text(text) => println!("A: {text}"),
                EntryPayload::Table(table) => {
                    println!("{}", table.columns.join(" | "));
                    for row in &table.rows {
                        let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                        println!("{}", cells.join(" | "));
                    }
                }
                EntryPayload::Api(api) => {
                    println!("{} {}", api.method, api.endpoint);
                    if let Some(description) = api.description {
                        println!("{description}");
                    }
                    if let Some(next) = api.next_step {
                        println!("Next: {next}");
                    }
                }
            }
            if !entry.keywords.is_empty() {
                println!("Keywords: {}", entry.keywords.join(", "));
            }
        }
        Command::Add(args) => {
            if manager.active().add_entry(args.into_entry()?).await? {
                println!("✅ Saved via {}", manager.active_type());
            } else {
                println!("⚠️  Not saved: that id or question is already stored");
            }
        }
        Command::Update { id, entry } => {
            let entry = entry.into_entry()?.with_id(id);
            if manager.active().update_entry(entry).await? {
                println!("✅ Updated via {}", manager.active_type());
            } else {
                println!("⚠️  Not updated: another entry already has that question");
            }
        }
        Command::Delete { id } => {
            manager.active().delete_entry(&id).await?;
            println!("🗑️  Deleted {id}");
        }
        Command::Call { id, token } => {
            let entry = find_entry(manager, &id).await?;
            let resp = ApiCaller::from_config(config)?
                .execute_entry(&entry, token.as_deref())
                .await?;
            let mark = if resp.success { "✅" } else { "❌" };
            println!("{mark} {} {} → {} ({} bytes)", resp.method, resp.url, resp.status, resp.size);
            match resp.data {
                serde_json::Value::String(text) => println!("{text}"),
                data => println!("{}", serde_json::to_string_pretty(&data)?),
            }
        }
        Command::Chain { query, max_depth } => {
            let steps = knowbase_providers::follow_api_chain(manager.active().as_ref(), &query, max_depth).await;
            if steps.is_empty() {
                println!("No API entry matches.");
            }
            for (i, step) in steps.iter().enumerate() {
                println!("{}. [{:>3}] {} → {} {}", i + 1, step.score, step.entry.question, step.api.method, step.api.endpoint);
            }
        }
    }
    Ok(())
}
