// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine configuration and compile-time limits.
//!
//! [`EngineConfig`] is fixed for the lifetime of an
//! [`AccessEngine`](crate::AccessEngine). It can be built in code, loaded
//! from TOML (`config-file` feature), or overlaid from the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `ASEC_STRICT_HOST_RESOLUTION` | `strict_host_resolution` |
//! | `ASEC_MAX_AUDIT_ENTRIES` | `max_audit_entries` |

use thiserror::Error;

/// Number of CALC inputs per resource group (A..L).
pub const CALC_NUM_INPUTS: usize = 12;

/// VM stack capacity. Programs needing more are rejected at compile time.
pub const CALC_STACK_SIZE: usize = 80;

/// Longest accepted infix expression, in bytes.
pub const MAX_CALC_LENGTH: usize = 256;

/// Lower bound (exclusive) of the band a condition result must fall in to count as TRUE.
pub const CALC_TRUE_LOW: f64 = 0.99;

/// Upper bound (exclusive) of the TRUE band.
pub const CALC_TRUE_HIGH: f64 = 1.01;

/// Default bound on retained reload audit entries.
pub const DEFAULT_MAX_AUDIT_ENTRIES: usize = 256;

/// Prefix stored for hosts that could not be resolved in strict mode.
pub const UNRESOLVED_HOST_PREFIX: &str = "unresolved:";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "config-file")]
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Process-wide engine options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct EngineConfig {
    /// Canonicalize HAG entries to resolved IPv4 dotted quads instead of
    /// lower-cased hostnames.
    pub strict_host_resolution: bool,

    /// Reload audit entries kept before the oldest are dropped.
    pub max_audit_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_host_resolution: false,
            max_audit_entries: DEFAULT_MAX_AUDIT_ENTRIES,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `ASEC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Overlay `ASEC_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var("ASEC_STRICT_HOST_RESOLUTION") {
            self.strict_host_resolution = parse_flag(&v).ok_or_else(|| {
                ConfigError::Invalid(format!("ASEC_STRICT_HOST_RESOLUTION: '{}'", v))
            })?;
        }
        if let Ok(v) = std::env::var("ASEC_MAX_AUDIT_ENTRIES") {
            self.max_audit_entries = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("ASEC_MAX_AUDIT_ENTRIES: '{}'", v))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Load configuration from a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text. Missing keys keep their defaults.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_audit_entries == 0 {
            return Err(ConfigError::Invalid(
                "max_audit_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert!(!c.strict_host_resolution);
        assert_eq!(c.max_audit_entries, DEFAULT_MAX_AUDIT_ENTRIES);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("YES"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_zero_audit_entries_rejected() {
        let c = EngineConfig {
            max_audit_entries: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_from_toml_partial() {
        let c = EngineConfig::from_toml_str("strict_host_resolution = true\n").unwrap();
        assert!(c.strict_host_resolution);
        assert_eq!(c.max_audit_entries, DEFAULT_MAX_AUDIT_ENTRIES);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_audit_entries = 8").unwrap();
        let c = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(c.max_audit_entries, 8);
        assert!(!c.strict_host_resolution);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_from_toml_rejects_unknown_type() {
        let err = EngineConfig::from_toml_str("strict_host_resolution = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
