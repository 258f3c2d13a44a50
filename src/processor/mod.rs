//! Enrichment pipeline applied to events before they reach a bucket.
//!
//! Each logger owns a [`Pipeline`] built from its [`ProcessorSet`] and
//! [`PrivacyFlags`]. Processors run in reverse registration order and each
//! one decides through its own level gate whether to touch the record.

pub mod backtrace;
pub mod identity;
pub mod introspection;
pub mod request;

pub use backtrace::BacktraceProcessor;
pub use identity::{hash_value, IdentityProcessor};
pub use introspection::IntrospectionProcessor;
pub use request::RequestProcessor;

use crate::context::RuntimeContext;
use crate::record::{EventRecord, Level};
use serde::{Deserialize, Serialize};
use std::panic::Location;

/// Source location of a logging call, captured with `#[track_caller]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

/// What a processor can see besides the record itself.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext<'a> {
    pub runtime: &'a RuntimeContext,
    pub call_site: Option<CallSite>,
}

/// One pipeline stage.
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Records below this level pass through untouched.
    fn min_level(&self) -> Level {
        Level::Unknown
    }

    fn process(&self, record: EventRecord, ctx: &ProcessContext<'_>) -> EventRecord;
}

/// Which enrichment steps a logger runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorSet {
    #[serde(default = "default_true")]
    pub identity: bool,
    #[serde(default = "default_true")]
    pub request: bool,
    #[serde(default = "default_true")]
    pub introspection: bool,
    #[serde(default)]
    pub backtrace: bool,

    /// Floor for backtrace capture, independent of the logger threshold
    #[serde(default = "default_backtrace_level")]
    pub backtrace_level: Level,
}

fn default_true() -> bool {
    true
}

fn default_backtrace_level() -> Level {
    Level::Error
}

impl Default for ProcessorSet {
    fn default() -> Self {
        Self {
            identity: true,
            request: true,
            introspection: true,
            backtrace: false,
            backtrace_level: default_backtrace_level(),
        }
    }
}

impl ProcessorSet {
    pub fn none() -> Self {
        Self {
            identity: false,
            request: false,
            introspection: false,
            backtrace: false,
            backtrace_level: default_backtrace_level(),
        }
    }
}

/// Privacy switches of one logger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyFlags {
    /// Replace the remote IP with a one-way hash
    #[serde(default)]
    pub obfuscate_ip: bool,

    /// Replace user id and name with one-way hashes
    #[serde(default)]
    pub pseudonymize_user: bool,
}

/// Ordered list of processors.
#[derive(Default)]
pub struct Pipeline {
    processors: Vec<Box<dyn Processor>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the pipeline of a logger.
    ///
    /// Registration order is identity, request, introspection, backtrace, so
    /// backtrace capture runs first and identity hashing runs last.
    pub fn for_logger(set: &ProcessorSet, privacy: &PrivacyFlags, salt: &str) -> Self {
        let mut pipeline = Self::new();
        if set.identity {
            pipeline.push(IdentityProcessor::new(*privacy, salt));
        }
        if set.request {
            pipeline.push(RequestProcessor);
        }
        if set.introspection {
            pipeline.push(IntrospectionProcessor::default());
        }
        if set.backtrace {
            pipeline.push(BacktraceProcessor::new(set.backtrace_level));
        }
        pipeline
    }

    pub fn push(&mut self, processor: impl Processor + 'static) {
        self.processors.push(Box::new(processor));
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Processor names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().rev().map(|p| p.name()).collect()
    }

    pub fn run(&self, mut record: EventRecord, ctx: &ProcessContext<'_>) -> EventRecord {
        for processor in self.processors.iter().rev() {
            if record.level.meets(processor.min_level()) {
                record = processor.process(record, ctx);
            }
        }
        record
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
