//! # ChatMacro CLI
//!
//! Usage:
//!   chatmacro list                          # Every stored macro
//!   chatmacro search "hello"                # Full-text (trigram) query
//!   chatmacro find "greet world"            # Token-ranked lookup
//!   chatmacro add greet/hello --content "/say {0}" --command hi
//!   chatmacro run hi world                  # Print each rendered line
//!   chatmacro next "0 9 * * *" --tz Europe/Berlin --count 3
//!   chatmacro schedule                      # Fire configured triggers until Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chatmacro_core::{AtomicBusyFlag, ChatServer, Macro, MacroConfig, MacroError};
use chatmacro_exec::{MacroExecutor, MessageFormat, SharedExecutionLock};
use chatmacro_scheduler::{CronTrigger, SchedulerDriver, spawn_ticker};
use chatmacro_store::{MacroQueue, MacroSet, MacroTable, lookup};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatmacro", version, about = "💬 ChatMacro — searchable chat macros with cron triggers")]
struct Cli {
    /// Config file (defaults to ~/.chatmacro/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path, overriding the config
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored macros
    List {
        /// Only macros carrying this tag
        #[arg(long)]
        tag: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Full-text search over name, path, command and tags
    Search { query: String },
    /// Rank the working set against whitespace-separated filter tokens
    Find { filter: String },
    /// Add or replace a macro
    Add {
        path: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long, default_value = "")]
        command: String,
        /// Default argument string
        #[arg(long, default_value = "")]
        args: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long = "loop")]
        looping: bool,
    },
    /// Remove a macro by path
    Remove { path: String },
    /// Move a macro to a new path
    Rename { old_path: String, new_path: String },
    /// Run a macro by path or command, printing each outbound line
    Run {
        target: String,
        /// Arguments, one per shell word (defaults to the macro's args)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Render every argument in relay form
        #[arg(long)]
        relay: bool,
    },
    /// Show upcoming occurrences of a cron expression
    Next {
        expression: String,
        #[arg(long, default_value = "UTC")]
        tz: String,
        #[arg(long, default_value = "5")]
        count: usize,
    },
    /// Run the configured schedulers until Ctrl-C
    Schedule,
}

/// Outbound channel that prints each line to stdout.
struct ConsoleServer;

impl ChatServer for ConsoleServer {
    fn send(&self, message: &str) -> chatmacro_core::Result<()> {
        println!("{message}");
        Ok(())
    }
}

fn print_macro(m: &Macro) {
    let command = if m.has_command() { format!(" ({})", m.command) } else { String::new() };
    let looping = if m.looping { " 🔁" } else { "" };
    println!("📄 {}{command}{looping}", m.path);
    if !m.tags.is_empty() {
        println!("   🏷️  {}", m.joined_tags());
    }
}

fn build_executor(config: &MacroConfig) -> MacroExecutor {
    let lock = Arc::new(SharedExecutionLock::new(Arc::new(AtomicBusyFlag::new())));
    MacroExecutor::new(lock, Arc::new(ConsoleServer)).with_config(&config.executor)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "chatmacro=debug,chatmacro_store=debug,chatmacro_exec=debug,chatmacro_scheduler=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => MacroConfig::load_from(path)?,
        None => MacroConfig::load()?,
    };
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    tracing::debug!(
        "⚙️ Config loaded: db={}, {} scheduler(s)",
        config.database_path().display(),
        config.schedulers.len()
    );

    match cli.command {
        Command::Next { expression, tz, count } => show_next(&expression, &tz, count),
        Command::Schedule => schedule(&config).await,
        command => store_command(command, &config).await,
    }
}

async fn store_command(command: Command, config: &MacroConfig) -> Result<()> {
    let table = Arc::new(MacroTable::open(&config.database_path())?);
    let queue = MacroQueue::new(table.clone())?;
    let mut set = MacroSet::new();
    set.reload(&table)?;

    match command {
        Command::List { tag, json } => {
            let macros: Vec<Macro> = match &tag {
                Some(tag) => set.with_tag(tag).into_iter().cloned().collect(),
                None => table.list()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&macros)?);
            } else {
                macros.iter().for_each(print_macro);
                println!("\n{} macro(s)", macros.len());
            }
        }
        Command::Search { query } => {
            let hits = table.search(&query)?;
            hits.iter().for_each(print_macro);
            println!("\n{} match(es)", hits.len());
        }
        Command::Find { filter } => {
            let hits = lookup(set.iter(), &filter);
            hits.iter().for_each(print_macro);
            println!("\n{} match(es)", hits.len());
        }
        Command::Add { path, content, command, args, tags, looping } => {
            let m = Macro::new(&path)
                .with_content(&content)
                .with_command(&command)
                .with_args(&args)
                .with_tags(tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()))
                .looping(looping);
            let previous = set.get(&m.path).map(|p| p.path.clone());
            set.validate(&m, previous.as_deref())?;
            set.upsert(m.clone());
            let outcome = queue.insert(&m).wait().await?;
            println!("✅ Saved '{}' ({} row(s))", m.path, outcome.affected);
        }
        Command::Remove { path } => {
            let Some(m) = set.remove(&path) else {
                bail!(MacroError::NotFound(path));
            };
            queue.delete(&m).wait().await?;
            println!("🗑️  Removed '{}'", m.path);
        }
        Command::Rename { old_path, new_path } => {
            let Some(existing) = set.get(&old_path).cloned() else {
                bail!(MacroError::NotFound(old_path));
            };
            // Only the path column moves; the stored name stays as it was.
            let mut updated = existing;
            updated.path = new_path;
            set.rename(&old_path, updated.clone())?;
            queue.rename(&updated, &old_path).wait().await?;
            println!("✏️  '{old_path}' → '{}'", updated.path);
        }
        Command::Run { target, args, relay } => {
            let Some(m) = set.get(&target).or_else(|| set.find_by_command(&target)).cloned() else {
                bail!(MacroError::NotFound(target));
            };
            let format = if relay { MessageFormat::Relay } else { MessageFormat::Plain };
            let executor = build_executor(config);
            let handle = executor.run_with_args(&m, format, args)?;
            let ticket = handle.ticket;
            tokio::select! {
                _ = handle.finished() => {}
                _ = tokio::signal::ctrl_c() => {
                    executor.cancel_all();
                    println!("\n🛑 Cancelled ticket {ticket}");
                }
            }
        }
        Command::Next { .. } | Command::Schedule => {}
    }
    Ok(())
}

fn show_next(expression: &str, tz: &str, count: usize) -> Result<()> {
    let trigger = CronTrigger::new(expression, tz, "")?;
    let mut from = chrono::Utc::now();
    println!("⏰ {expression} ({tz})");
    for _ in 0..count {
        let Some(next) = trigger.next_occurrence(from) else {
            break;
        };
        println!("   {}", next.to_rfc3339());
        from = next;
    }
    Ok(())
}

async fn schedule(config: &MacroConfig) -> Result<()> {
    let executor = build_executor(config);
    let lock = executor.lock().clone();
    let driver = SchedulerDriver::new(&config.schedulers, executor.clone());
    if driver.trigger_count() == 0 {
        println!("⚠️  No enabled triggers in config");
        return Ok(());
    }
    println!("📅 {} trigger(s) armed, Ctrl-C to stop", driver.trigger_count());

    let period = Duration::from_millis(config.scheduler.tick_interval_ms.max(1));
    let ticker = spawn_ticker(Arc::new(tokio::sync::Mutex::new(driver)), lock, period);
    tokio::signal::ctrl_c().await?;
    ticker.abort();
    executor.cancel_all();
    println!("\n👋 Scheduler stopped");
    Ok(())
}
