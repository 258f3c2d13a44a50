//! Exposition formats for [`super::Monitor`].

use super::{Labels, MetricFamily, MetricKind, SeriesValue};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fmt::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Prometheus text exposition
    Prometheus,
    /// InfluxDB line protocol
    Influx,
    /// Datadog series JSON
    Datadog,
    /// New Relic metric JSON
    NewRelic,
}

impl Format {
    pub const ALL: [Format; 4] = [
        Format::Prometheus,
        Format::Influx,
        Format::Datadog,
        Format::NewRelic,
    ];

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Prometheus => "text/plain; version=0.0.4",
            Format::Influx => "text/plain; charset=utf-8",
            Format::Datadog | Format::NewRelic => "application/json",
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prometheus" | "openmetrics" => Ok(Format::Prometheus),
            "influx" | "influxdb" => Ok(Format::Influx),
            "datadog" => Ok(Format::Datadog),
            "newrelic" | "new-relic" => Ok(Format::NewRelic),
            other => Err(format!("unknown metrics format '{}'", other)),
        }
    }
}

/// Values fixed at render time.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub timestamp: DateTime<Utc>,
    /// Time covered by cumulative counters
    pub interval_ms: u64,
    pub base_labels: Labels,
}

pub fn render(families: &[MetricFamily], format: Format, ctx: &RenderContext) -> String {
    match format {
        Format::Prometheus => render_prometheus(families, ctx),
        Format::Influx => render_influx(families, ctx),
        Format::Datadog => render_datadog(families, ctx),
        Format::NewRelic => render_newrelic(families, ctx),
    }
}

/// Series labels win over base labels with the same key.
fn merged(base: &Labels, series: &Labels) -> Labels {
    let mut labels = base.clone();
    labels.extend(series.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels
}

fn format_value(v: f64) -> String {
    if v.is_infinite() {
        let sign = if v > 0.0 { "+" } else { "-" };
        format!("{}Inf", sign)
    } else if v.is_nan() {
        "NaN".to_string()
    } else if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn json_number(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

// Prometheus

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn prometheus_labels(labels: &Labels, extra: Option<(&str, &str)>) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    if let Some((k, v)) = extra {
        parts.push(format!("{}=\"{}\"", k, escape_label_value(v)));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}

fn render_prometheus(families: &[MetricFamily], ctx: &RenderContext) -> String {
    let mut out = String::new();
    for family in families {
        let help = family.help.replace('\\', "\\\\").replace('\n', "\\n");
        let _ = writeln!(out, "# HELP {} {}", family.name, help);
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind);

        for (series_labels, value) in &family.series {
            let labels = merged(&ctx.base_labels, series_labels);
            match value {
                SeriesValue::Scalar(v) => {
                    let _ = writeln!(
                        out,
                        "{}{} {}",
                        family.name,
                        prometheus_labels(&labels, None),
                        format_value(*v)
                    );
                }
                SeriesValue::Histogram(state) => {
                    let bounds = family
                        .buckets
                        .iter()
                        .map(|b| format_value(*b))
                        .chain(std::iter::once("+Inf".to_string()));
                    for (le, count) in bounds.zip(state.cumulative()) {
                        let _ = writeln!(
                            out,
                            "{}_bucket{} {}",
                            family.name,
                            prometheus_labels(&labels, Some(("le", &le))),
                            count
                        );
                    }
                    let plain = prometheus_labels(&labels, None);
                    let _ = writeln!(out, "{}_sum{} {}", family.name, plain, format_value(state.sum));
                    let _ = writeln!(out, "{}_count{} {}", family.name, plain, state.count);
                }
            }
        }
    }
    out
}

// InfluxDB line protocol

/// Split a metric name into measurement and field: the first three
/// `_`-separated tokens name the measurement, the remainder the field.
/// Shorter names use the whole name and the field `value`.
pub fn influx_split(name: &str) -> (String, String) {
    let tokens: Vec<&str> = name.split('_').collect();
    if tokens.len() < 4 {
        return (name.to_string(), "value".to_string());
    }
    (tokens[..3].join("_"), tokens[3..].join("_"))
}

fn escape_influx(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn render_influx(families: &[MetricFamily], ctx: &RenderContext) -> String {
    let timestamp = ctx.timestamp.timestamp_nanos_opt().unwrap_or_default();
    let mut out = String::new();

    for family in families {
        let (measurement, field) = influx_split(&family.name);
        for (series_labels, value) in &family.series {
            let tags: String = merged(&ctx.base_labels, series_labels)
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| format!(",{}={}", escape_influx(k), escape_influx(v)))
                .collect();
            let fields = match value {
                SeriesValue::Scalar(v) => format!("{}={}", field, format_value(*v)),
                SeriesValue::Histogram(state) => format!(
                    "{f}_count={c}i,{f}_sum={s}",
                    f = field,
                    c = state.count,
                    s = format_value(state.sum)
                ),
            };
            let _ = writeln!(
                out,
                "{}{} {} {}",
                escape_influx(&measurement),
                tags,
                fields,
                timestamp
            );
        }
    }
    out
}

// Datadog

fn datadog_tags(labels: &Labels) -> Vec<String> {
    labels.iter().map(|(k, v)| format!("{}:{}", k, v)).collect()
}

fn render_datadog(families: &[MetricFamily], ctx: &RenderContext) -> String {
    let ts = ctx.timestamp.timestamp();
    let mut series = Vec::new();

    for family in families {
        for (series_labels, value) in &family.series {
            let tags = datadog_tags(&merged(&ctx.base_labels, series_labels));
            match value {
                SeriesValue::Scalar(v) => {
                    let kind = match family.kind {
                        MetricKind::Counter => "count",
                        _ => "gauge",
                    };
                    series.push(json!({
                        "metric": family.name,
                        "type": kind,
                        "points": [[ts, json_number(*v)]],
                        "tags": tags,
                    }));
                }
                SeriesValue::Histogram(state) => {
                    series.push(json!({
                        "metric": format!("{}.count", family.name),
                        "type": "count",
                        "points": [[ts, state.count]],
                        "tags": tags,
                    }));
                    series.push(json!({
                        "metric": format!("{}.sum", family.name),
                        "type": "gauge",
                        "points": [[ts, json_number(state.sum)]],
                        "tags": tags,
                    }));
                }
            }
        }
    }

    json!({ "series": series }).to_string()
}

// New Relic

fn attributes(labels: &Labels) -> Value {
    Value::Object(
        labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<Map<String, Value>>(),
    )
}

fn render_newrelic(families: &[MetricFamily], ctx: &RenderContext) -> String {
    let mut metrics = Vec::new();

    for family in families {
        for (series_labels, value) in &family.series {
            let attrs = attributes(series_labels);
            match value {
                SeriesValue::Scalar(v) => {
                    let kind = match family.kind {
                        MetricKind::Counter => "count",
                        _ => "gauge",
                    };
                    metrics.push(json!({
                        "name": family.name,
                        "type": kind,
                        "value": json_number(*v),
                        "attributes": attrs,
                    }));
                }
                SeriesValue::Histogram(state) => {
                    let (min, max) = if state.count == 0 {
                        (0.0, 0.0)
                    } else {
                        (state.min, state.max)
                    };
                    metrics.push(json!({
                        "name": family.name,
                        "type": "summary",
                        "value": {
                            "count": state.count,
                            "sum": json_number(state.sum),
                            "min": json_number(min),
                            "max": json_number(max),
                        },
                        "attributes": attrs,
                    }));
                }
            }
        }
    }

    json!([{
        "common": {
            "timestamp": ctx.timestamp.timestamp_millis(),
            "interval.ms": ctx.interval_ms,
            "attributes": attributes(&ctx.base_labels),
        },
        "metrics": metrics,
    }])
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{Monitor, Profile};
    use crate::record::Channel;
    use chrono::TimeZone;

    fn ctx() -> RenderContext {
        let mut base_labels = Labels::new();
        base_labels.insert("channel".to_string(), "cron".to_string());
        base_labels.insert("environment".to_string(), "prod".to_string());
        RenderContext {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            interval_ms: 60_000,
            base_labels,
        }
    }

    fn sample_families() -> Vec<MetricFamily> {
        let m = Monitor::new(Channel::Cron, "prod");
        m.create_counter(Profile::Production, "wp_cron_jobs_run_total", "Jobs run")
            .unwrap();
        m.inc_counter(Profile::Production, "wp_cron_jobs_run_total", &[("hook", "backup")], 3.0)
            .unwrap();
        m.create_histogram(Profile::Production, "job_seconds", "Job time", Some(vec![1.0, 5.0]))
            .unwrap();
        m.observe(Profile::Production, "job_seconds", &[], 0.5).unwrap();
        m.observe(Profile::Production, "job_seconds", &[], 2.0).unwrap();
        m.families(Profile::Production)
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("Prometheus".parse::<Format>(), Ok(Format::Prometheus));
        assert_eq!("influxdb".parse::<Format>(), Ok(Format::Influx));
        assert_eq!("new-relic".parse::<Format>(), Ok(Format::NewRelic));
        assert!("graphite".parse::<Format>().is_err());
    }

    #[test]
    fn test_prometheus_exposition() {
        let text = render(&sample_families(), Format::Prometheus, &ctx());

        assert!(text.contains("# HELP wp_cron_jobs_run_total Jobs run\n"));
        assert!(text.contains("# TYPE wp_cron_jobs_run_total counter\n"));
        assert!(text.contains(
            "wp_cron_jobs_run_total{channel=\"cron\",environment=\"prod\",hook=\"backup\"} 3\n"
        ));
        assert!(text.contains("# TYPE job_seconds histogram\n"));
        assert!(text.contains("job_seconds_bucket{channel=\"cron\",environment=\"prod\",le=\"1\"} 1\n"));
        assert!(text.contains("job_seconds_bucket{channel=\"cron\",environment=\"prod\",le=\"5\"} 2\n"));
        assert!(text.contains("job_seconds_bucket{channel=\"cron\",environment=\"prod\",le=\"+Inf\"} 2\n"));
        assert!(text.contains("job_seconds_sum{channel=\"cron\",environment=\"prod\"} 2.5\n"));
        assert!(text.contains("job_seconds_count{channel=\"cron\",environment=\"prod\"} 2\n"));
    }

    #[test]
    fn test_prometheus_escapes_label_values() {
        let m = Monitor::new(Channel::Cli, "a\"b");
        m.create_gauge(Profile::Production, "g", "").unwrap();
        m.set_gauge(Profile::Production, "g", &[], 1.0).unwrap();
        let text = m.render(Profile::Production, Format::Prometheus);
        assert!(text.contains("environment=\"a\\\"b\""));
    }

    #[test]
    fn test_influx_split() {
        assert_eq!(
            influx_split("wp_cron_jobs_run_total"),
            ("wp_cron_jobs".to_string(), "run_total".to_string())
        );
        assert_eq!(
            influx_split("job_seconds"),
            ("job_seconds".to_string(), "value".to_string())
        );
    }

    #[test]
    fn test_influx_line_protocol() {
        let text = render(&sample_families(), Format::Influx, &ctx());
        let ns = ctx().timestamp.timestamp_nanos_opt().unwrap();

        assert!(text.contains(&format!(
            "job_seconds,channel=cron,environment=prod value_count=2i,value_sum=2.5 {}\n",
            ns
        )));
        assert!(text.contains(&format!(
            "wp_cron_jobs,channel=cron,environment=prod,hook=backup run_total=3 {}\n",
            ns
        )));
    }

    #[test]
    fn test_datadog_series() {
        let text = render(&sample_families(), Format::Datadog, &ctx());
        let body: Value = serde_json::from_str(&text).unwrap();
        let series = body["series"].as_array().unwrap();
        assert_eq!(series.len(), 3);

        let counter = series
            .iter()
            .find(|s| s["metric"] == "wp_cron_jobs_run_total")
            .unwrap();
        assert_eq!(counter["type"], "count");
        assert_eq!(counter["points"][0][0], ctx().timestamp.timestamp());
        assert_eq!(counter["points"][0][1], 3.0);
        let tags: Vec<_> = counter["tags"].as_array().unwrap().iter().collect();
        assert!(tags.contains(&&Value::from("hook:backup")));
        assert!(tags.contains(&&Value::from("environment:prod")));

        assert!(series.iter().any(|s| s["metric"] == "job_seconds.count"));
    }

    #[test]
    fn test_newrelic_payload() {
        let text = render(&sample_families(), Format::NewRelic, &ctx());
        let body: Value = serde_json::from_str(&text).unwrap();
        let batch = &body[0];

        assert_eq!(batch["common"]["attributes"]["channel"], "cron");
        assert_eq!(batch["common"]["interval.ms"], 60_000);
        let metrics = batch["metrics"].as_array().unwrap();
        let summary = metrics.iter().find(|m| m["type"] == "summary").unwrap();
        assert_eq!(summary["value"]["count"], 2);
        assert_eq!(summary["value"]["min"], 0.5);
        assert_eq!(summary["value"]["max"], 2.0);
    }
}
