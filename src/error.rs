/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Crate-wide error type with recovery classification.

use std::fmt;
use thiserror::Error;

/// Main error type for librepo-rs operations.
#[derive(Debug, Error)]
pub enum LibrepoError {
    /// Misuse of the API (bad argument combination, invariant violated by the caller).
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// Neither a base URL, mirrorlist, nor metalink was configured.
    #[error("no download source configured (urls/mirrorlist_url/metalink_url all empty)")]
    NoUrl,

    /// The transport layer refused an option or reported a transport-level error.
    #[error("transport error for {url}: {message}")]
    Transport {
        url: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Non-2xx HTTP/FTP status.
    #[error("bad status {status} from {url}")]
    BadStatus { url: String, status: u16 },

    /// Downloaded file did not match any expected checksum.
    #[error("checksum mismatch for '{file}': expected one of {expected:?}, got {actual}")]
    BadChecksum {
        file: String,
        expected: Vec<String>,
        actual: String,
    },

    /// An algorithm name was not recognized.
    #[error("unknown checksum algorithm: {0}")]
    UnknownChecksum(String),

    /// Filesystem or file-descriptor operation failed.
    #[error("io error at '{path}': {message}")]
    Io {
        path: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// `repomd.xml` failed to parse.
    #[error("repomd.xml parse error: {0}")]
    RepomdXml(String),

    /// Metalink XML failed to parse.
    #[error("metalink parse error: {0}")]
    MetalinkXml(String),

    /// A mirrorlist file was structurally parseable but yielded no usable content.
    #[error("mirrorlist has no usable entries")]
    MirrorlistBad,

    /// A metalink document was structurally parseable but missing the requested file.
    #[error("metalink does not contain the requested file '{0}'")]
    MetalinkBad(String),

    /// The configured signature backend is not available.
    #[error("signature verification not supported: {0}")]
    SignatureNotSupported(String),

    /// The signature backend itself failed (not a verdict on the signature).
    #[error("signature verification error: {0}")]
    SignatureError(String),

    /// The signature backend ran and rejected the signature.
    #[error("bad signature for '{0}'")]
    BadSignature(String),

    /// `repomd.xml` is missing a record the caller asked for.
    #[error("incomplete repository: missing record(s) {0:?}")]
    IncompleteRepo(Vec<String>),

    /// Destination directory could not be created.
    #[error("cannot create directory '{0}'")]
    CannotCreateDir(String),

    /// A temporary file could not be created.
    #[error("cannot create temporary file: {0}")]
    CannotCreateTmp(String),

    /// SIGINT observed while `interruptible` was set.
    #[error("operation interrupted")]
    Interrupted,

    /// The readiness wait (socket poll) failed.
    #[error("select/poll error: {0}")]
    Select(String),

    /// Non-error signal: the target was already present and verified.
    #[error("'{0}' already downloaded")]
    AlreadyDownloaded(String),

    /// `local_only` was set but the configured URL is not a local path.
    #[error("local_only is set but '{0}' is not a local URL")]
    NotLocal(String),

    /// Configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// How a caller (or the scheduler itself) should react to a given error.
///
/// Mirrors the "Local recovery" rules in the error-handling design: most
/// per-mirror failures are retryable on the next mirror, a handful are
/// fatal to the whole call, and a couple are not really errors at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryHint {
    /// Retry the same target on the next untried mirror.
    RetryNextMirror,
    /// Abort the whole call; nothing short of caller intervention helps.
    Fatal,
    /// Not actually a failure — informational signal for the package façade.
    Informational,
}

impl fmt::Display for RecoveryHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryHint::RetryNextMirror => write!(f, "retry-next-mirror"),
            RecoveryHint::Fatal => write!(f, "fatal"),
            RecoveryHint::Informational => write!(f, "informational"),
        }
    }
}

impl LibrepoError {
    /// Classify this error per the error-handling design's recovery rules.
    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            LibrepoError::Transport { .. }
            | LibrepoError::BadStatus { .. }
            | LibrepoError::BadChecksum { .. } => RecoveryHint::RetryNextMirror,
            LibrepoError::AlreadyDownloaded(_) => RecoveryHint::Informational,
            _ => RecoveryHint::Fatal,
        }
    }

    /// True if the scheduler should try the next mirror rather than failing the target.
    pub fn is_retryable(&self) -> bool {
        matches!(self.recovery_hint(), RecoveryHint::RetryNextMirror)
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        LibrepoError::Io {
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        LibrepoError::Transport {
            url: url.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }
}

/// Result type alias for librepo-rs operations.
pub type LibrepoResult<T> = std::result::Result<T, LibrepoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LibrepoError::MetalinkBad("repomd.xml".to_string());
        assert_eq!(
            format!("{}", err),
            "metalink does not contain the requested file 'repomd.xml'"
        );
    }

    #[test]
    fn test_recovery_hint() {
        let bad_status = LibrepoError::BadStatus {
            url: "http://example/x".into(),
            status: 503,
        };
        assert!(bad_status.is_retryable());

        let interrupted = LibrepoError::Interrupted;
        assert!(!interrupted.is_retryable());
        assert_eq!(interrupted.recovery_hint(), RecoveryHint::Fatal);

        let already = LibrepoError::AlreadyDownloaded("x.bin".into());
        assert_eq!(already.recovery_hint(), RecoveryHint::Informational);
    }
}
