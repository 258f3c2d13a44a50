//! Metrics command
//!
//! Renders per-logger bucket gauges in one of the supported exposition
//! formats, for scraping or pushing by an external collector.

use anyhow::Result;
use clap::Parser;
use fanlog::config::Settings;
use fanlog::monitor::{Format, Monitor, Profile};
use fanlog::registry::{LoggerRegistry, Stream};
use fanlog::storage::RecordFilter;
use fanlog::{Channel, Level};

#[derive(Debug, Clone, Parser)]
pub struct MetricsArgs {
    /// Output format: prometheus, influx, datadog, newrelic
    #[arg(short = 'f', long, default_value = "prometheus")]
    pub format: String,

    /// Metric profile: production or development
    #[arg(long, default_value = "production")]
    pub profile: String,
}

const RECORDS: &str = "fanlog_bucket_records";
const ERRORS: &str = "fanlog_bucket_error_records";
const RUNNING: &str = "fanlog_loggers_running";

/// Fill a monitor with the current state of every logger.
pub async fn collect(registry: &LoggerRegistry, monitor: &Monitor, profile: Profile) -> Result<()> {
    monitor.create_gauge(profile, RECORDS, "Records currently stored per logger")?;
    monitor.create_gauge(profile, ERRORS, "Stored records at error level or above")?;
    monitor.create_gauge(profile, RUNNING, "Loggers currently accepting records")?;

    let mut running = 0.0;
    for definition in registry.list().await {
        let Some(active) = registry.active(definition.uuid).await else {
            continue;
        };
        if definition.running {
            running += 1.0;
        }

        let uuid = definition.uuid.to_string();
        let medium = definition.handler.medium().to_string();
        let labels = [
            ("logger", definition.name.as_str()),
            ("uuid", uuid.as_str()),
            ("medium", medium.as_str()),
        ];
        let total = active.bucket.get_count(&RecordFilter::new()).await;
        monitor.set_gauge(profile, RECORDS, &labels, total as f64)?;

        if definition.stream == Stream::Events {
            let errors = active
                .bucket
                .get_count(&RecordFilter::new().level(Level::Error))
                .await;
            monitor.set_gauge(profile, ERRORS, &labels, errors as f64)?;
        }
    }
    monitor.set_gauge(profile, RUNNING, &[], running)?;
    Ok(())
}

/// Execute the metrics command
pub async fn execute(settings: &Settings, args: MetricsArgs) -> Result<()> {
    let format: Format = args.format.parse().map_err(anyhow::Error::msg)?;
    let profile: Profile = args.profile.parse().map_err(anyhow::Error::msg)?;

    let registry = super::open_registry(settings).await?;
    let monitor = Monitor::new(Channel::Cli, settings.monitor.environment.clone());
    collect(&registry, &monitor, profile).await?;

    print!("{}", monitor.render(profile, format));
    if matches!(format, Format::Datadog | Format::NewRelic) {
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanlog::registry::{BackendFactory, HandlerConfig, LoggerDraft};
    use fanlog::storage::{Database, FileStore, ProcessCache, RetentionPolicy};
    use fanlog::EventRecord;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_collect_bucket_gauges() {
        let temp = TempDir::new().unwrap();
        let factory = BackendFactory::new(
            Database::in_memory().await.unwrap(),
            ProcessCache::new(),
            FileStore::open(temp.path()).unwrap(),
        );
        let registry = LoggerRegistry::new(factory, "salt", None);
        let uuid = registry
            .create(
                LoggerDraft::new(
                    "audit",
                    HandlerConfig::Database {
                        retention: RetentionPolicy::default(),
                    },
                )
                .paused(),
            )
            .await
            .unwrap();
        let logger = registry.active(uuid).await.unwrap();
        let bucket = logger.bucket.events().unwrap();
        bucket.insert_value(&EventRecord::new(Level::Error, "a")).await.unwrap();
        bucket.insert_value(&EventRecord::new(Level::Info, "b")).await.unwrap();

        let monitor = Monitor::new(Channel::Cli, "test");
        collect(&registry, &monitor, Profile::Production).await.unwrap();
        let text = monitor.render(Profile::Production, Format::Prometheus);

        assert!(text.contains("# TYPE fanlog_bucket_records gauge"));
        assert!(text.contains(&format!(
            "fanlog_bucket_records{{channel=\"cli\",environment=\"test\",logger=\"audit\",medium=\"database\",uuid=\"{}\"}} 2",
            uuid
        )));
        assert!(text.contains("fanlog_bucket_error_records{"));
        assert!(text.contains("fanlog_loggers_running{channel=\"cli\",environment=\"test\"} 0"));
    }
}
