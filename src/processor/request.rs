//! HTTP request metadata.

use super::{ProcessContext, Processor};
use crate::record::EventRecord;

/// Longest value kept for any request field
const MAX_FIELD_LEN: usize = 2048;

/// Strip characters that break delimited or structured log formats.
///
/// Removes control characters, quotes, backslashes and angle brackets, then
/// trims and truncates. Returns `None` if nothing is left.
pub fn sanitize(value: &str) -> Option<String> {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '"' | '\'' | '\\' | '<' | '>' | '`'))
        .take(MAX_FIELD_LEN)
        .collect();
    let cleaned = cleaned.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Attaches url, verb, server, referrer and user agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestProcessor;

impl Processor for RequestProcessor {
    fn name(&self) -> &'static str {
        "request"
    }

    fn process(&self, mut record: EventRecord, ctx: &ProcessContext<'_>) -> EventRecord {
        let Some(request) = &ctx.runtime.request else {
            return record;
        };

        let clean = |field: &Option<String>| field.as_deref().and_then(sanitize);
        record.url = clean(&request.url);
        record.verb = clean(&request.verb).map(|v| v.to_ascii_uppercase());
        record.server = clean(&request.server);
        record.referrer = clean(&request.referrer);
        record.user_agent = clean(&request.user_agent);
        record
    }
}
