//! Bridge configuration.
//!
//! Read from the environment on first use and cached for the process:
//! - `SDL3_BRIDGE_LOG`: structured log threshold. `off` (default), `error`,
//!   `warn`, `info`, `debug`, `trace`.
//! - `SDL3_BRIDGE_LOG_FILE`: append log lines to this file instead of stderr.
//! - `SDL3_BRIDGE_POISON`: when truthy, blocks released by the allocator
//!   bridge are filled with [`POISON_BYTE`] before going back to the host
//!   allocator, so native use-after-free reads garbage instead of stale data.

use std::path::PathBuf;
use std::sync::OnceLock;

pub const ENV_LOG: &str = "SDL3_BRIDGE_LOG";
pub const ENV_LOG_FILE: &str = "SDL3_BRIDGE_LOG_FILE";
pub const ENV_POISON: &str = "SDL3_BRIDGE_POISON";

/// Fill pattern for released blocks when poisoning is enabled.
pub const POISON_BYTE: u8 = 0xDD;

/// Structured log threshold. Ordered from quietest to noisiest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    #[default]
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse from string (case-insensitive). Unknown values map to `Off`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "err" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "info" | "1" | "on" | "true" => Self::Info,
            "debug" => Self::Debug,
            "trace" | "all" => Self::Trace,
            _ => Self::Off,
        }
    }

    /// True when a record at `level` passes this threshold.
    #[must_use]
    pub fn enables(self, level: LogLevel) -> bool {
        level != Self::Off && level <= self
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Resolved bridge settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub poison_freed: bool,
}

impl BridgeConfig {
    /// Build a config from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_level = lookup(ENV_LOG)
            .map(|v| LogLevel::from_str_loose(&v))
            .unwrap_or_default();
        let log_file = lookup(ENV_LOG_FILE)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let poison_freed = lookup(ENV_POISON).is_some_and(|v| parse_flag(&v));
        Self {
            log_level,
            log_file,
            poison_freed,
        }
    }

    /// Build a config from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

fn parse_flag(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

static GLOBAL_CONFIG: OnceLock<BridgeConfig> = OnceLock::new();

/// Get the process configuration (reads env vars on first call, caches thereafter).
#[must_use]
pub fn bridge_config() -> &'static BridgeConfig {
    GLOBAL_CONFIG.get_or_init(BridgeConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parse_log_levels() {
        assert_eq!(LogLevel::from_str_loose("error"), LogLevel::Error);
        assert_eq!(LogLevel::from_str_loose("WARN"), LogLevel::Warn);
        assert_eq!(LogLevel::from_str_loose("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from_str_loose(" info "), LogLevel::Info);
        assert_eq!(LogLevel::from_str_loose("1"), LogLevel::Info);
        assert_eq!(LogLevel::from_str_loose("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str_loose("trace"), LogLevel::Trace);
        assert_eq!(LogLevel::from_str_loose("off"), LogLevel::Off);
        assert_eq!(LogLevel::from_str_loose("bogus"), LogLevel::Off);
    }

    #[test]
    fn threshold_filters_noisier_levels() {
        assert!(LogLevel::Warn.enables(LogLevel::Error));
        assert!(LogLevel::Warn.enables(LogLevel::Warn));
        assert!(!LogLevel::Warn.enables(LogLevel::Info));
        assert!(!LogLevel::Off.enables(LogLevel::Error));
        assert!(!LogLevel::Trace.enables(LogLevel::Off));
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = BridgeConfig::from_lookup(|_| None);
        assert_eq!(cfg, BridgeConfig::default());
        assert_eq!(cfg.log_level, LogLevel::Off);
        assert!(!cfg.poison_freed);
    }

    #[test]
    fn reads_all_keys() {
        let cfg = BridgeConfig::from_lookup(lookup_from(&[
            (ENV_LOG, "debug"),
            (ENV_LOG_FILE, "/tmp/bridge.jsonl"),
            (ENV_POISON, "yes"),
        ]));
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.log_file, Some(PathBuf::from("/tmp/bridge.jsonl")));
        assert!(cfg.poison_freed);
    }

    #[test]
    fn blank_log_file_is_ignored() {
        let cfg = BridgeConfig::from_lookup(lookup_from(&[(ENV_LOG_FILE, "  ")]));
        assert_eq!(cfg.log_file, None);
    }

    #[test]
    fn poison_flag_is_strict_about_truthiness() {
        for off in ["0", "false", "no", ""] {
            let cfg = BridgeConfig::from_lookup(lookup_from(&[(ENV_POISON, off)]));
            assert!(!cfg.poison_freed, "{off:?} should not enable poisoning");
        }
    }
}
