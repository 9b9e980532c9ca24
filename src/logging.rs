/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Logging and observability with tracing support.
//!
//! The crate never initializes a global subscriber on its own import —
//! only a consuming binary or test harness calls `init`/`init_with_level`.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system at the default `info` level.
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific level (overridden by `RUST_LOG` if set).
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .compact(),
        )
        .init();
}

/// Initialize logging with optional file output, falling back to console-only
/// if the file cannot be opened.
pub fn init_with_file(level: &str, log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let file_layer = fmt::layer().with_writer(file).with_ansi(false).with_target(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .with(file_layer)
                .init();

            return;
        }
    }

    init_with_level(level);
}

/// Re-exported for convenience so callers don't need a direct `tracing` dependency.
pub use tracing::{debug, error, info, trace, warn};

/// Span covering one scheduler call (§4.I).
#[macro_export]
macro_rules! span_scheduler {
    () => {
        tracing::info_span!("scheduler")
    };
}

/// Span covering one bound transfer attempt (one mirror, one target).
#[macro_export]
macro_rules! span_transfer {
    ($target:expr, $mirror:expr, $attempt:expr) => {
        tracing::debug_span!("transfer", target = $target, mirror = $mirror, attempt = $attempt)
    };
}

/// Span covering one metadata-flow run (§4.J).
#[macro_export]
macro_rules! span_metadata_flow {
    ($repo:expr) => {
        tracing::info_span!("metadata_flow", repo = $repo)
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_does_not_panic() {
        // tracing's global subscriber can only be set once per process, so we
        // can't call init() here without racing other tests; this just checks
        // the module compiles and the macros expand.
        let _span = crate::span_scheduler!();
    }
}
