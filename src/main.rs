use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use fanlog::config::{load_settings, Settings};
use fanlog::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // Config commands report load errors themselves
    if let cli::Commands::Config { action } = &args.command {
        init_tracing("text", "warn");
        return match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config),
            cli::ConfigCommands::Validate => commands::config::validate(&args.config),
        };
    }

    let settings: Settings = load_settings(&args.config)?;
    init_tracing(&settings.logging.log_format, &settings.logging.log_level);
    fanlog::metrics::describe_metrics();

    match args.command {
        cli::Commands::Loggers(loggers) => commands::loggers::execute(&settings, loggers).await?,
        cli::Commands::Emit(emit) => commands::emit::execute(&settings, emit).await?,
        cli::Commands::Logs(logs) => commands::logs::execute(&settings, logs).await?,
        cli::Commands::Rotate => commands::rotate::execute(&settings).await?,
        cli::Commands::Run => commands::run::execute(&settings).await?,
        cli::Commands::Metrics(metrics) => commands::metrics::execute(&settings, metrics).await?,
        cli::Commands::Config { .. } => {}
        cli::Commands::Version => {
            println!("fanlog v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
