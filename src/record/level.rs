//! Severity levels, execution channels and component classes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event severity, ordered from least to most severe.
///
/// `Unknown` sorts below `Debug` so that a threshold of `Debug` accepts every
/// known level while still rejecting records that could not be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Unknown,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Level {
    pub const ALL: [Level; 9] = [
        Level::Unknown,
        Level::Debug,
        Level::Info,
        Level::Notice,
        Level::Warning,
        Level::Error,
        Level::Critical,
        Level::Alert,
        Level::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Unknown => "unknown",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Notice => "notice",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
            Level::Alert => "alert",
            Level::Emergency => "emergency",
        }
    }

    /// This level and every more severe one.
    pub fn at_or_above(self) -> impl Iterator<Item = Level> {
        Level::ALL.into_iter().filter(move |l| *l >= self)
    }

    /// Whether an event at `self` passes a `threshold`.
    pub fn meets(self, threshold: Level) -> bool {
        self >= threshold
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid level: {0}")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(Level::Unknown),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "notice" => Ok(Level::Notice),
            "warning" | "warn" => Ok(Level::Warning),
            "error" | "err" => Ok(Level::Error),
            "critical" | "crit" => Ok(Level::Critical),
            "alert" => Ok(Level::Alert),
            "emergency" | "emerg" => Ok(Level::Emergency),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Execution context an event was emitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Cli,
    Cron,
    Ajax,
    Xmlrpc,
    Api,
    Feed,
    /// Back-office (admin) web request
    Wback,
    /// Public-facing web request
    Wfront,
    #[default]
    Unknown,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Cli => "cli",
            Channel::Cron => "cron",
            Channel::Ajax => "ajax",
            Channel::Xmlrpc => "xmlrpc",
            Channel::Api => "api",
            Channel::Feed => "feed",
            Channel::Wback => "wback",
            Channel::Wfront => "wfront",
            Channel::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "cli" => Channel::Cli,
            "cron" => Channel::Cron,
            "ajax" => Channel::Ajax,
            "xmlrpc" => Channel::Xmlrpc,
            "api" => Channel::Api,
            "feed" => Channel::Feed,
            "wback" | "web-admin" => Channel::Wback,
            "wfront" | "web-front" => Channel::Wfront,
            _ => Channel::Unknown,
        })
    }
}

/// Kind of component that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentClass {
    Plugin,
    Theme,
    #[default]
    Library,
    Core,
}

impl ComponentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentClass::Plugin => "plugin",
            ComponentClass::Theme => "theme",
            ComponentClass::Library => "library",
            ComponentClass::Core => "core",
        }
    }
}

impl fmt::Display for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentClass {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "plugin" => ComponentClass::Plugin,
            "theme" => ComponentClass::Theme,
            "core" => ComponentClass::Core,
            _ => ComponentClass::Library,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Alert < Level::Emergency);
        assert!(Level::Unknown < Level::Debug);
    }

    #[test]
    fn test_upward_closure_from_warning() {
        let levels: Vec<Level> = Level::Warning.at_or_above().collect();
        assert_eq!(
            levels,
            vec![
                Level::Warning,
                Level::Error,
                Level::Critical,
                Level::Alert,
                Level::Emergency
            ]
        );
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("WARN".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("emergency".parse::<Level>().unwrap(), Level::Emergency);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_serde_lowercase() {
        let json = serde_json::to_string(&Level::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn test_channel_aliases() {
        assert_eq!("web-admin".parse::<Channel>().unwrap(), Channel::Wback);
        assert_eq!("nope".parse::<Channel>().unwrap(), Channel::Unknown);
    }
}
