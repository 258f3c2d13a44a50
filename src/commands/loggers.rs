//! Logger management commands

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use fanlog::config::Settings;
use fanlog::processor::{PrivacyFlags, ProcessorSet};
use fanlog::registry::{HandlerConfig, LoggerDefinition, LoggerDraft, LoggerRegistry, Stream};
use fanlog::storage::{RecordFilter, RetentionPolicy};
use fanlog::Level;

/// Logger management
#[derive(Debug, Clone, Parser)]
pub struct LoggersArgs {
    #[command(subcommand)]
    pub action: LoggersAction,
}

#[derive(Debug, Clone, Subcommand)]
pub enum LoggersAction {
    /// List loggers in registration order
    List {
        /// Also count the records in each bucket
        #[arg(long)]
        counts: bool,
    },

    /// Create a logger
    Add(LoggerOptions),

    /// Replace a logger's settings (UUID and running state are kept)
    Edit {
        /// UUID, UUID prefix or name
        logger: String,

        #[command(flatten)]
        options: LoggerOptions,
    },

    /// Stop delivering events to a logger
    Pause { logger: String },

    /// Resume delivering events to a logger
    Start { logger: String },

    /// Delete a logger and its bucket
    Delete { logger: String },

    /// Remove every record from a logger's bucket
    Purge { logger: String },
}

#[derive(Debug, Clone, Args)]
pub struct LoggerOptions {
    /// Display name
    pub name: String,

    /// Storage medium: database, shared_cache, shared_memory
    #[arg(long, default_value = "database")]
    pub handler: String,

    /// Minimum level delivered to this logger
    #[arg(short, long, default_value = "info")]
    pub level: String,

    /// Drop records older than this many hours (0 = no age bound)
    #[arg(long, default_value = "0")]
    pub max_age_hours: u32,

    /// Keep at most this many records (0 = no count bound)
    #[arg(long, default_value = "0")]
    pub max_records: u32,

    /// Store traces instead of events
    #[arg(long)]
    pub traces: bool,

    /// Create the logger paused
    #[arg(long)]
    pub paused: bool,

    /// Hash the remote IP before storing it
    #[arg(long)]
    pub obfuscate_ip: bool,

    /// Hash user id and name before storing them
    #[arg(long)]
    pub pseudonymize_user: bool,

    /// Attach a backtrace to records at or above `--backtrace-level`
    #[arg(long)]
    pub backtrace: bool,

    #[arg(long, default_value = "error")]
    pub backtrace_level: String,
}

impl LoggerOptions {
    fn into_draft(self) -> Result<LoggerDraft> {
        let retention = RetentionPolicy::new(self.max_age_hours, self.max_records);
        let handler = HandlerConfig::from_parts(&self.handler, retention)?;
        let level: Level = self.level.parse()?;

        let processors = ProcessorSet {
            backtrace: self.backtrace,
            backtrace_level: self.backtrace_level.parse()?,
            ..ProcessorSet::default()
        };
        let mut draft = LoggerDraft::new(self.name, handler)
            .level(level)
            .privacy(PrivacyFlags {
                obfuscate_ip: self.obfuscate_ip,
                pseudonymize_user: self.pseudonymize_user,
            })
            .processors(processors);
        if self.traces {
            draft = draft.stream(Stream::Traces);
        }
        if self.paused {
            draft = draft.paused();
        }
        Ok(draft)
    }
}

/// Execute a loggers command
pub async fn execute(settings: &Settings, args: LoggersArgs) -> Result<()> {
    let registry = super::open_registry(settings).await?;

    match args.action {
        LoggersAction::List { counts } => list(&registry, counts).await?,
        LoggersAction::Add(options) => {
            let uuid = registry.create(options.into_draft()?).await?;
            println!("{} {}", "✓ Logger created:".green(), uuid);
        }
        LoggersAction::Edit { logger, options } => {
            let uuid = super::resolve_logger(&registry, &logger).await?;
            registry.update(uuid, options.into_draft()?).await?;
            println!("{} {}", "✓ Logger updated:".green(), uuid);
        }
        LoggersAction::Pause { logger } => {
            let uuid = super::resolve_logger(&registry, &logger).await?;
            registry.pause(uuid).await?;
            println!("{} {}", "Logger paused:".yellow(), uuid);
        }
        LoggersAction::Start { logger } => {
            let uuid = super::resolve_logger(&registry, &logger).await?;
            registry.start(uuid).await?;
            println!("{} {}", "✓ Logger running:".green(), uuid);
        }
        LoggersAction::Delete { logger } => {
            let uuid = super::resolve_logger(&registry, &logger).await?;
            registry.delete(uuid).await?;
            println!("{} {}", "Logger deleted:".red(), uuid);
        }
        LoggersAction::Purge { logger } => {
            let uuid = super::resolve_logger(&registry, &logger).await?;
            let removed = registry.purge(uuid).await?;
            println!("{} {} records removed", "✓ Purged:".green(), removed);
        }
    }

    Ok(())
}

fn describe_retention(definition: &LoggerDefinition) -> String {
    let retention = definition.handler.retention();
    match (retention.max_age_hours, retention.max_records) {
        (0, 0) => "unbounded".to_string(),
        (hours, 0) => format!("{}h", hours),
        (0, records) => format!("{} records", records),
        (hours, records) => format!("{}h / {} records", hours, records),
    }
}

async fn list(registry: &LoggerRegistry, counts: bool) -> Result<()> {
    let loggers = registry.list().await;
    if loggers.is_empty() {
        println!("{}", "No loggers configured".yellow());
        return Ok(());
    }

    println!("{}", format!("{} loggers", loggers.len()).bold());
    println!();

    for definition in &loggers {
        let state = if definition.running {
            "running".green()
        } else {
            "paused".yellow()
        };
        let stream = match definition.stream {
            Stream::Events => "events",
            Stream::Traces => "traces",
        };
        let mut line = format!(
            "{}  {:<20} {:<8} {:<14} {:<7} >= {:<9} {}",
            definition.uuid.to_string().dimmed(),
            definition.name.bold(),
            state,
            definition.handler.medium().to_string(),
            stream,
            definition.level.as_str(),
            describe_retention(definition),
        );
        if definition.system {
            line.push_str(&format!(" {}", "[system]".cyan()));
        }
        if counts {
            if let Some(active) = registry.active(definition.uuid).await {
                let count = active.bucket.get_count(&RecordFilter::new()).await;
                line.push_str(&format!(" ({} records)", count));
            }
        }
        println!("{}", line);
    }

    Ok(())
}
