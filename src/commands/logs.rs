//! Logs query command
//!
//! Read records back from a logger's bucket.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use fanlog::config::Settings;
use fanlog::registry::Bucket;
use fanlog::storage::{RecordFilter, RecordId, StoredRecord};
use fanlog::{EventRecord, Level, TraceRecord};

/// Query and display records
#[derive(Debug, Clone, Parser)]
pub struct LogsArgs {
    /// UUID, UUID prefix or name of the logger
    pub logger: String,

    /// Minimum level
    #[arg(short, long)]
    pub level: Option<String>,

    /// Exact field match, e.g. `--field component=backup` (repeatable)
    #[arg(long = "field", value_parser = parse_field)]
    pub fields: Vec<(String, String)>,

    /// Show a single record by id
    #[arg(long)]
    pub id: Option<String>,

    /// Skip this many records
    #[arg(long, default_value = "0")]
    pub offset: usize,

    /// Maximum number of results (0 = all)
    #[arg(long, default_value = "100")]
    pub limit: usize,

    /// Only print the number of matching records
    #[arg(long)]
    pub count: bool,

    /// Output format (text, json)
    #[arg(short = 'f', long, default_value = "text")]
    pub format: String,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))
}

/// Execute the logs command
pub async fn execute(settings: &Settings, args: LogsArgs) -> Result<()> {
    let registry = super::open_registry(settings).await?;
    let uuid = super::resolve_logger(&registry, &args.logger).await?;
    let logger = registry
        .active(uuid)
        .await
        .ok_or(fanlog::Error::LoggerNotFound(uuid))?;

    let mut filter = RecordFilter::from_pairs(args.fields.clone())?;
    if let Some(level) = &args.level {
        filter = filter.level(level.parse::<Level>()?);
    }

    if args.count {
        println!("{}", logger.bucket.get_count(&filter).await);
        return Ok(());
    }

    match &logger.bucket {
        Bucket::Events(bucket) => {
            let records = match &args.id {
                Some(id) => fetch_one(bucket.get_by_id(&id.parse::<RecordId>()?).await),
                None => bucket.get_list(&filter, args.offset, args.limit).await,
            };
            print_records(&records, &args.format, display_event)?;
        }
        Bucket::Traces(bucket) => {
            let records = match &args.id {
                Some(id) => fetch_one(bucket.get_by_id(&id.parse::<RecordId>()?).await),
                None => bucket.get_list(&filter, args.offset, args.limit).await,
            };
            print_records(&records, &args.format, display_trace)?;
        }
    }

    Ok(())
}

fn fetch_one<R>(record: Option<StoredRecord<R>>) -> Vec<StoredRecord<R>> {
    record.into_iter().collect()
}

fn print_records<R: serde::Serialize>(
    records: &[StoredRecord<R>],
    format: &str,
    display: fn(&StoredRecord<R>),
) -> Result<()> {
    if records.is_empty() {
        println!("{}", "No records found matching the criteria".yellow());
        return Ok(());
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(records)?),
        _ => {
            println!("{}", format!("Found {} records", records.len()).bold());
            println!();
            records.iter().for_each(display);
        }
    }
    Ok(())
}

fn colored_level(level: Level) -> colored::ColoredString {
    let name = format!("{:<9}", level.as_str().to_uppercase());
    match level {
        Level::Emergency | Level::Alert | Level::Critical => name.red().bold(),
        Level::Error => name.red(),
        Level::Warning => name.yellow().bold(),
        Level::Notice => name.cyan(),
        Level::Info => name.green(),
        Level::Debug => name.blue(),
        Level::Unknown => name.normal(),
    }
}

fn display_event(stored: &StoredRecord<EventRecord>) {
    let record = &stored.record;
    println!(
        "{} {} {} {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string().dimmed(),
        colored_level(record.level),
        format!("[{}:{}]", record.class, record.component).cyan(),
        record.message
    );

    let mut details = vec![format!("id={}", stored.id), format!("code={}", record.code)];
    details.push(format!("channel={}", record.channel));
    if let (Some(file), Some(line)) = (&record.file, record.line) {
        details.push(format!("at={}:{}", file, line));
    }
    if let Some(user) = &record.user_name {
        details.push(format!("user={}", user));
    }
    if let Some(ip) = &record.remote_ip {
        details.push(format!("ip={}", ip));
    }
    println!("  {}", details.join(" ").dimmed());

    if let Some(trace) = &record.trace {
        for line in trace.lines() {
            println!("    {}", line.dimmed());
        }
    }
}

fn display_trace(stored: &StoredRecord<TraceRecord>) {
    let record = &stored.record;
    println!(
        "{} {} {} {}ms {} spans",
        record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string().dimmed(),
        record.trace_id.bold(),
        record.instance.cyan(),
        record.duration_ms,
        record.span_count()
    );
    for span in record.spans() {
        let tags: Vec<String> = span.tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!(
            "  +{:>6}ms {:<24} {:>6}ms {}",
            span.start_ms,
            span.name,
            span.duration_ms,
            tags.join(" ").dimmed()
        );
    }
}
