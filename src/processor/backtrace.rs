//! Full call stack capture for severe events.

use super::{ProcessContext, Processor};
use crate::record::{EventRecord, Level};
use regex::Regex;
use std::backtrace::Backtrace;
use std::sync::LazyLock;

static FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+:\s+(?P<symbol>.+?)\s*$").unwrap());
static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at\s+(?P<file>.+?):(?P<line>\d+)(?::\d+)?\s*$").unwrap()
});

/// One resolved stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub symbol: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Frame {
    /// Module path of the symbol, without the function name.
    pub fn module(&self) -> Option<&str> {
        self.symbol.rsplit_once("::").map(|(module, _)| module)
    }

    pub fn function(&self) -> &str {
        self.symbol
            .rsplit_once("::")
            .map(|(_, f)| f)
            .unwrap_or(&self.symbol)
    }
}

/// Parse the textual form of a [`Backtrace`] into frames.
pub fn parse_frames(text: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = FRAME_RE.captures(line) {
            frames.push(Frame {
                symbol: caps["symbol"].to_string(),
                file: None,
                line: None,
            });
        } else if let Some(caps) = LOCATION_RE.captures(line) {
            if let Some(frame) = frames.last_mut() {
                if frame.file.is_none() {
                    frame.file = Some(caps["file"].to_string());
                    frame.line = caps["line"].parse().ok();
                }
            }
        }
    }
    frames
}

/// Capture the current stack, regardless of `RUST_BACKTRACE`.
pub fn capture_frames() -> Vec<Frame> {
    parse_frames(&Backtrace::force_capture().to_string())
}

/// Attaches a readable multi-line stack to events at or above its floor.
#[derive(Debug, Clone, Copy)]
pub struct BacktraceProcessor {
    floor: Level,
}

impl BacktraceProcessor {
    pub fn new(floor: Level) -> Self {
        Self { floor }
    }
}

impl Default for BacktraceProcessor {
    fn default() -> Self {
        Self::new(Level::Error)
    }
}

impl Processor for BacktraceProcessor {
    fn name(&self) -> &'static str {
        "backtrace"
    }

    fn min_level(&self) -> Level {
        self.floor
    }

    fn process(&self, mut record: EventRecord, _ctx: &ProcessContext<'_>) -> EventRecord {
        let formatted: Vec<String> = capture_frames()
            .into_iter()
            .enumerate()
            .map(|(i, frame)| match (&frame.file, frame.line) {
                (Some(file), Some(line)) => format!("#{} {} at {}:{}", i, frame.symbol, file, line),
                _ => format!("#{} {}", i, frame.symbol),
            })
            .collect();

        if !formatted.is_empty() {
            record.trace = Some(formatted.join("\n"));
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RuntimeContext;
    use crate::processor::Pipeline;

    const SAMPLE: &str = "   0: std::backtrace::Backtrace::force_capture
             at /rustc/abc/library/std/src/backtrace.rs:312:13
   1: app::jobs::nightly_backup
             at ./src/jobs.rs:88:9
   2: __libc_start_main
";

    #[test]
    fn test_parse_frames() {
        let frames = parse_frames(SAMPLE);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].symbol, "app::jobs::nightly_backup");
        assert_eq!(frames[1].file.as_deref(), Some("./src/jobs.rs"));
        assert_eq!(frames[1].line, Some(88));
        assert_eq!(frames[1].module(), Some("app::jobs"));
        assert_eq!(frames[1].function(), "nightly_backup");
        assert_eq!(frames[2].file, None);
    }

    #[test]
    fn test_gated_below_floor() {
        let mut pipeline = Pipeline::new();
        pipeline.push(BacktraceProcessor::default());
        let runtime = RuntimeContext::default();
        let ctx = ProcessContext {
            runtime: &runtime,
            call_site: None,
        };

        let warning = pipeline.run(EventRecord::new(Level::Warning, "w"), &ctx);
        assert!(warning.trace.is_none());

        let critical = pipeline.run(EventRecord::new(Level::Critical, "c"), &ctx);
        let trace = critical.trace.unwrap();
        assert!(trace.starts_with("#0 "));
    }
}
