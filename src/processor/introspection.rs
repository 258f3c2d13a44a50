//! Call site introspection.

use super::backtrace::{capture_frames, Frame};
use super::{CallSite, ProcessContext, Processor};
use crate::record::EventRecord;
use regex::Regex;
use std::sync::LazyLock;

/// Symbol prefixes that never count as the origin of an event.
pub const DEFAULT_SKIP: &[&str] = &[
    "fanlog::",
    "<fanlog::",
    "std::",
    "<std::",
    "core::",
    "<core::",
    "alloc::",
    "<alloc::",
    "tokio::",
    "<tokio::",
    "tracing",
    "<tracing",
    "async_trait",
    "__rust",
];

/// Matches `at FILE:LINE[:COL]` or `in FILE on line N`.
static BOOTSTRAP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:\bat\s+(?P<file>[^\s:]+):(?P<line>\d+)(?::\d+)?)|(?:\bin\s+(?P<file2>\S+)\s+on\s+line\s+(?P<line2>\d+))",
    )
    .unwrap()
});

/// Parse a source location out of free text.
pub fn parse_location(message: &str) -> Option<(String, i64)> {
    let caps = BOOTSTRAP_RE.captures(message)?;
    let (file, line) = match (caps.name("file"), caps.name("line")) {
        (Some(file), Some(line)) => (file, line),
        _ => (caps.name("file2")?, caps.name("line2")?),
    };
    Some((file.as_str().to_string(), line.as_str().parse().ok()?))
}

/// Attaches file, line, class and function of the code that logged.
///
/// The `#[track_caller]` location is used when present, with class and
/// function taken from the stack frame at that location. Without symbols the
/// class falls back to the module path of the file and the function stays
/// empty. Otherwise the stack is walked and the first frame outside the
/// skip-list wins. During
/// bootstrap, when no call site can be trusted, the location is parsed from
/// the message text instead.
#[derive(Debug, Clone)]
pub struct IntrospectionProcessor {
    skip: Vec<String>,
}

impl Default for IntrospectionProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_SKIP.iter().map(|s| s.to_string()))
    }
}

impl IntrospectionProcessor {
    pub fn new(skip: impl IntoIterator<Item = String>) -> Self {
        Self {
            skip: skip.into_iter().collect(),
        }
    }

    fn is_skipped(&self, symbol: &str) -> bool {
        self.skip.iter().any(|prefix| symbol.starts_with(prefix.as_str()))
    }

    fn first_foreign_frame(&self) -> Option<Frame> {
        capture_frames()
            .into_iter()
            .find(|frame| frame.file.is_some() && !self.is_skipped(&frame.symbol))
    }

    /// The stack frame executing at a known call site, when symbols allow it.
    fn frame_at(&self, site: &CallSite) -> Option<Frame> {
        capture_frames().into_iter().find(|frame| {
            frame.line == Some(site.line)
                && frame
                    .file
                    .as_deref()
                    .is_some_and(|file| file.replace('\\', "/").ends_with(site.file))
        })
    }
}

/// Module path and function name of a frame, with async closure layers removed.
fn frame_names(frame: &Frame) -> (Option<String>, String) {
    let mut symbol = frame.symbol.as_str();
    while let Some(outer) = symbol.strip_suffix("::{{closure}}") {
        symbol = outer;
    }
    match symbol.rsplit_once("::") {
        Some((module, function)) => (Some(module.to_string()), function.to_string()),
        None => (None, symbol.to_string()),
    }
}

/// Best guess at a module path from a source path: `src/jobs/backup.rs` gives `jobs::backup`.
pub fn module_from_path(file: &str) -> Option<String> {
    let file = file.replace('\\', "/");
    let stem = file.strip_suffix(".rs")?;
    let stem = stem
        .rsplit_once("/src/")
        .map(|(_, rest)| rest)
        .or_else(|| stem.strip_prefix("src/"))
        .unwrap_or(stem);
    let parts: Vec<&str> = stem
        .split('/')
        .filter(|part| !part.is_empty() && !matches!(*part, "mod" | "lib" | "main"))
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("::"))
}

impl Processor for IntrospectionProcessor {
    fn name(&self) -> &'static str {
        "introspection"
    }

    fn process(&self, mut record: EventRecord, ctx: &ProcessContext<'_>) -> EventRecord {
        if ctx.runtime.bootstrap {
            if let Some((file, line)) = parse_location(&record.message) {
                record.file = Some(file);
                record.line = Some(line);
            }
            return record;
        }

        if let Some(site) = ctx.call_site {
            record.file = Some(site.file.to_string());
            record.line = Some(i64::from(site.line));
            match self.frame_at(&site) {
                Some(frame) => {
                    let (module, function) = frame_names(&frame);
                    record.classname = module;
                    record.function = Some(function);
                }
                None => record.classname = module_from_path(site.file),
            }
            return record;
        }

        if let Some(frame) = self.first_foreign_frame() {
            let (module, function) = frame_names(&frame);
            record.classname = module;
            record.function = Some(function);
            record.file = frame.file;
            record.line = frame.line.map(i64::from);
        }
        record
    }
}
