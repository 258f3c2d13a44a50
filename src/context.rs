//! Runtime context of the unit of work emitting events.
//!
//! Callers of the logging API only pass a level, a message and a code.
//! Everything else (channel, site, user, request metadata) is derived from a
//! [`ContextProvider`] installed by the host application.

use crate::record::Channel;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request metadata attached by the request processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub url: Option<String>,
    pub verb: Option<String>,
    pub server: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
}

/// Snapshot of who and where an event comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeContext {
    pub channel: Channel,
    pub site_id: Option<i64>,
    pub site_name: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub session: Option<String>,
    pub remote_ip: Option<String>,
    pub request: Option<RequestInfo>,

    /// Host-wide debug switch, consulted when `respect_debug_flag` is on
    #[serde(default)]
    pub debug_flag: bool,

    /// Set while the host is still booting and no call stack can be trusted
    #[serde(default)]
    pub bootstrap: bool,
}

impl RuntimeContext {
    pub fn for_channel(channel: Channel) -> Self {
        Self {
            channel,
            ..Default::default()
        }
    }
}

/// Source of the current [`RuntimeContext`].
pub trait ContextProvider: Send + Sync {
    fn current(&self) -> RuntimeContext;
}

impl<F> ContextProvider for F
where
    F: Fn() -> RuntimeContext + Send + Sync,
{
    fn current(&self) -> RuntimeContext {
        self()
    }
}

/// Provider returning whatever context was last installed.
#[derive(Debug)]
pub struct StaticContext {
    inner: ArcSwap<RuntimeContext>,
}

impl StaticContext {
    pub fn new(context: RuntimeContext) -> Self {
        Self {
            inner: ArcSwap::from_pointee(context),
        }
    }

    /// Replace the context seen by subsequent dispatches.
    pub fn replace(&self, context: RuntimeContext) {
        self.inner.store(Arc::new(context));
    }
}

impl Default for StaticContext {
    fn default() -> Self {
        Self::new(RuntimeContext::default())
    }
}

impl ContextProvider for StaticContext {
    fn current(&self) -> RuntimeContext {
        self.inner.load().as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_context_replace() {
        let provider = StaticContext::default();
        assert_eq!(provider.current().channel, Channel::Unknown);

        provider.replace(RuntimeContext::for_channel(Channel::Cron));
        assert_eq!(provider.current().channel, Channel::Cron);
    }

    #[test]
    fn test_closure_provider() {
        let provider = || RuntimeContext {
            site_id: Some(3),
            ..RuntimeContext::for_channel(Channel::Cli)
        };
        let context = provider.current();
        assert_eq!(context.site_id, Some(3));
        assert_eq!(context.channel, Channel::Cli);
    }
}
