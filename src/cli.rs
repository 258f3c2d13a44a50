use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fanlog", version, about = "Multi-destination event logging")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "fanlog.toml", global = true, env = "FANLOG_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Manage configured loggers
    Loggers(crate::commands::loggers::LoggersArgs),

    /// Dispatch one event to every matching logger
    Emit(crate::commands::emit::EmitArgs),

    /// Read records from a logger's bucket
    Logs(crate::commands::logs::LogsArgs),

    /// Apply retention policies now
    Rotate,

    /// Run in the foreground, rotating buckets on the configured schedule
    Run,

    /// Render bucket metrics for an external collector
    Metrics(crate::commands::metrics::MetricsArgs),

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display current configuration (with the privacy salt masked)
    Show,

    /// Validate configuration file
    Validate,
}
