//! Emit command
//!
//! Dispatches one event through the configured loggers, as a host would.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use fanlog::config::Settings;
use fanlog::context::{RuntimeContext, StaticContext};
use fanlog::{Channel, ComponentClass, Dispatcher, Level};
use std::sync::Arc;

#[derive(Debug, Clone, Parser)]
pub struct EmitArgs {
    /// Level name (debug, info, notice, warning, error, critical, alert, emergency)
    pub level: String,

    pub message: String,

    /// Numeric event code
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    pub code: i64,

    /// Emitting component
    #[arg(long, default_value = "fanlog-cli")]
    pub component: String,

    /// Component class: plugin, theme, library, core
    #[arg(long, default_value = "library")]
    pub class: String,

    /// Channel recorded on the event
    #[arg(long, default_value = "cli")]
    pub channel: String,

    /// Mark the host debug switch as on
    #[arg(long)]
    pub debug_flag: bool,
}

/// Execute the emit command
pub async fn execute(settings: &Settings, args: EmitArgs) -> Result<()> {
    let level: Level = args.level.parse()?;
    let class: ComponentClass = args.class.parse()?;
    let channel: Channel = args.channel.parse()?;

    let registry = super::open_registry(settings).await?;
    let runtime = RuntimeContext {
        debug_flag: args.debug_flag,
        ..RuntimeContext::for_channel(channel)
    };
    let dispatcher = Arc::new(
        Dispatcher::new(registry, Arc::new(StaticContext::new(runtime)))
            .respect_debug_flag(settings.dispatch.respect_debug_flag),
    );

    let logger = dispatcher.logger(class, args.component, env!("CARGO_PKG_VERSION"));
    let mut context = serde_json::Map::new();
    context.insert("code".to_string(), args.code.into());
    let report = logger.log(level, args.message, &context).await;

    if report.suppressed {
        println!("{}", "Event suppressed (debug flag is off)".yellow());
        return Ok(());
    }

    println!(
        "{} delivered to {} logger(s)",
        "✓".green(),
        report.delivered.to_string().bold()
    );
    if report.failed > 0 {
        println!("{} dropped by {} logger(s)", "✗".red(), report.failed);
    }
    if report.skipped_level > 0 || report.skipped_paused > 0 {
        println!(
            "{}",
            format!(
                "skipped: {} below threshold, {} paused",
                report.skipped_level, report.skipped_paused
            )
            .dimmed()
        );
    }

    Ok(())
}
