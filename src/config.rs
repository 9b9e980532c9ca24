/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Layered configuration loader that seeds a [`crate::handle::Handle`] (§10.3).
//!
//! This is deliberately a thin producer of option values, not a replacement
//! for the Handle's own setters — `HandleConfig::load().apply_to(&mut handle)`
//! is expected to run before any explicit `handle.set_*` calls, which always
//! win.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Values loaded from config files and environment, used to seed a `Handle`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandleConfig {
    pub max_parallel_connections: usize,
    pub max_connections_per_host: i64,
    pub max_mirror_retries: i64,
    pub connect_timeout_secs: u64,
    pub resume_downloads: bool,
    pub user_agent: String,
    pub fastest_mirror_cache_path: Option<PathBuf>,
    pub fastest_mirror_cache_ttl_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            max_parallel_connections: 4,
            max_connections_per_host: 2,
            max_mirror_retries: 0,
            connect_timeout_secs: 30,
            resume_downloads: true,
            user_agent: concat!("librepo-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            fastest_mirror_cache_path: None,
            fastest_mirror_cache_ttl_secs: 6 * 60 * 60,
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration surfaced through the layered loader.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path (None = console-only)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl HandleConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. crate defaults
    /// 2. `/etc/librepo-rs/config.toml` (system-wide)
    /// 3. `$XDG_CONFIG_HOME/librepo-rs/config.toml` (user)
    /// 4. `LIBREPO_*` environment variables
    ///
    /// Explicit `Handle` builder calls made by the caller after this always
    /// take final precedence; this function never touches a `Handle` directly.
    pub fn load() -> Self {
        let mut config = HandleConfig::default();

        let system_config = Path::new("/etc/librepo-rs/config.toml");
        if system_config.exists() {
            if let Ok(content) = std::fs::read_to_string(system_config) {
                if let Ok(parsed) = toml::from_str::<HandleConfig>(&content) {
                    config = config.merge(parsed);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("librepo-rs").join("config.toml");
            if user_config.exists() {
                if let Ok(content) = std::fs::read_to_string(user_config) {
                    if let Ok(parsed) = toml::from_str::<HandleConfig>(&content) {
                        config = config.merge(parsed);
                    }
                }
            }
        }

        config.apply_env_overrides()
    }

    /// Merge another config into this one; only non-default fields of `other`
    /// override `self` (so a config file that sets only one field doesn't
    /// silently reset everything else to that file's defaults).
    fn merge(mut self, other: HandleConfig) -> Self {
        let default = HandleConfig::default();

        if other.max_parallel_connections != default.max_parallel_connections {
            self.max_parallel_connections = other.max_parallel_connections;
        }
        if other.max_connections_per_host != default.max_connections_per_host {
            self.max_connections_per_host = other.max_connections_per_host;
        }
        if other.max_mirror_retries != default.max_mirror_retries {
            self.max_mirror_retries = other.max_mirror_retries;
        }
        if other.connect_timeout_secs != default.connect_timeout_secs {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
        if other.resume_downloads != default.resume_downloads {
            self.resume_downloads = other.resume_downloads;
        }
        if other.user_agent != default.user_agent {
            self.user_agent = other.user_agent;
        }
        if other.fastest_mirror_cache_path.is_some() {
            self.fastest_mirror_cache_path = other.fastest_mirror_cache_path;
        }
        if other.fastest_mirror_cache_ttl_secs != default.fastest_mirror_cache_ttl_secs {
            self.fastest_mirror_cache_ttl_secs = other.fastest_mirror_cache_ttl_secs;
        }
        if other.logging.level != default.logging.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.file.is_some() {
            self.logging.file = other.logging.file;
        }

        self
    }

    fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("LIBREPO_MAX_PARALLEL_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                self.max_parallel_connections = n;
            }
        }
        if let Ok(val) = std::env::var("LIBREPO_MAX_CONNECTIONS_PER_HOST") {
            if let Ok(n) = val.parse() {
                self.max_connections_per_host = n;
            }
        }
        if let Ok(val) = std::env::var("LIBREPO_MAX_MIRROR_RETRIES") {
            if let Ok(n) = val.parse() {
                self.max_mirror_retries = n;
            }
        }
        if let Ok(val) = std::env::var("LIBREPO_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("LIBREPO_FASTEST_MIRROR_CACHE") {
            self.fastest_mirror_cache_path = Some(PathBuf::from(val));
        }

        self
    }

    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_parallel_connections == 0 {
            return Err("max_parallel_connections must be at least 1".to_string());
        }
        if self.max_connections_per_host == 0 {
            return Err("max_connections_per_host must be nonzero (-1 disables the cap)".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HandleConfig::default();
        assert_eq!(config.max_parallel_connections, 4);
        assert_eq!(config.max_connections_per_host, 2);
        assert!(config.resume_downloads);
    }

    #[test]
    fn test_config_validation() {
        let mut config = HandleConfig::default();
        assert!(config.validate().is_ok());

        config.max_parallel_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_keeps_untouched_defaults() {
        let base = HandleConfig::default();
        let override_only_retries = HandleConfig {
            max_mirror_retries: 5,
            ..HandleConfig::default()
        };
        let merged = base.merge(override_only_retries);
        assert_eq!(merged.max_mirror_retries, 5);
        assert_eq!(merged.max_parallel_connections, 4);
    }
}
