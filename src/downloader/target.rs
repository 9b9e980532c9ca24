/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! One requested file and its scheduler-internal lifecycle state (§3, §4.H).

use crate::downloader::mirror::MirrorHandle;
use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Where a target's bytes end up: exactly one of a caller-owned descriptor or
/// a filesystem path (§3 invariant). `FromFd` is duplicated by the scheduler
/// before use so the caller's own handle is never touched.
#[derive(Debug)]
pub enum Destination {
    Path(PathBuf),
    Fd(File),
}

/// Called as bytes arrive. Non-zero-like `Err` aborts only the current
/// mirror attempt (§4.I "Cancellation").
pub type ProgressCallback = Arc<dyn Fn(u64, u64) -> bool + Send + Sync>;
/// Called exactly once per target, after it reaches `Finished` or `Failed`.
pub type EndCallback = Arc<dyn Fn(&FinishedTarget) + Send + Sync>;
/// Called when a mirror attempt fails, before the retry decision. Returning
/// `false` suppresses the retry for this attempt (treated like a progress
/// callback abort).
pub type MirrorFailureCallback = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// A caller-supplied request for one file (§3 `DownloadTarget`).
pub struct DownloadTarget {
    /// Relative path under a mirror, or a full URL (contains `"://"`).
    pub path: String,
    /// Overrides the mirror pool when set; mirrors are then ignored.
    pub base_url: Option<String>,
    pub destination: Destination,
    /// Ordered `(algorithm, hex_digest)` pairs; first match wins.
    pub expected_checksums: Vec<(String, String)>,
    pub expected_size: Option<u64>,
    pub resume: bool,
    pub is_zchunk: bool,

    pub progress_callback: Option<ProgressCallback>,
    pub end_callback: Option<EndCallback>,
    pub mirror_failure_callback: Option<MirrorFailureCallback>,
}

impl std::fmt::Debug for DownloadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTarget")
            .field("path", &self.path)
            .field("base_url", &self.base_url)
            .field("expected_checksums", &self.expected_checksums)
            .field("expected_size", &self.expected_size)
            .field("resume", &self.resume)
            .field("is_zchunk", &self.is_zchunk)
            .finish()
    }
}

impl DownloadTarget {
    /// Build a target whose destination is a filesystem path. Copies `path`
    /// into owned storage so the caller may free its input immediately.
    pub fn to_path(path: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base_url: None,
            destination: Destination::Path(destination.into()),
            expected_checksums: Vec::new(),
            expected_size: None,
            resume: false,
            is_zchunk: false,
            progress_callback: None,
            end_callback: None,
            mirror_failure_callback: None,
        }
    }

    /// Build a target whose destination is an already-open file descriptor.
    pub fn to_fd(path: impl Into<String>, fd: File) -> Self {
        Self {
            path: path.into(),
            base_url: None,
            destination: Destination::Fd(fd),
            expected_checksums: Vec::new(),
            expected_size: None,
            resume: false,
            is_zchunk: false,
            progress_callback: None,
            end_callback: None,
            mirror_failure_callback: None,
        }
    }

    /// §9 Open Question 2: the list of checksums is authoritative. A single
    /// legacy value is promoted into a one-element list when the list is
    /// otherwise empty; it is never appended once the list is non-empty.
    pub fn with_legacy_checksum(mut self, algo: impl Into<String>, hex: impl Into<String>) -> Self {
        if self.expected_checksums.is_empty() {
            self.expected_checksums.push((algo.into(), hex.into()));
        }
        self
    }

    pub fn with_checksums(mut self, checksums: Vec<(String, String)>) -> Self {
        self.expected_checksums = checksums;
        self
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_zchunk(mut self, is_zchunk: bool) -> Self {
        self.is_zchunk = is_zchunk;
        self
    }

    pub fn with_progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }

    pub fn with_end_callback(mut self, cb: EndCallback) -> Self {
        self.end_callback = Some(cb);
        self
    }

    pub fn with_mirror_failure_callback(mut self, cb: MirrorFailureCallback) -> Self {
        self.mirror_failure_callback = Some(cb);
        self
    }

    /// A full URL bypasses the mirror pool entirely (§4.I step 2).
    pub fn is_full_url(&self) -> bool {
        self.path.contains("://")
    }

    pub fn destination_display(&self) -> String {
        match &self.destination {
            Destination::Path(p) => p.display().to_string(),
            Destination::Fd(_) => format!("<fd:{}>", self.path),
        }
    }
}

/// Machine-readable outcome written back onto a target once it is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Unfinished,
    Ok,
    Failed,
}

/// Result slots the scheduler fills in, mirroring §3's "result slots" note.
/// Guarded by a `Mutex` so an `Arc<DownloadTarget>` can be shared between the
/// caller and the scheduler's async tasks without requiring `&mut`.
#[derive(Debug)]
pub struct TargetResult {
    pub used_mirror: Option<String>,
    pub effective_url: Option<String>,
    pub return_code: ReturnCode,
    pub error_message: String,
}

impl Default for TargetResult {
    fn default() -> Self {
        Self {
            used_mirror: None,
            effective_url: None,
            return_code: ReturnCode::Unfinished,
            error_message: "not finished".to_string(),
        }
    }
}

/// Snapshot handed to the end-callback and returned to the caller once a
/// target is done (§4.I "Ordering guarantees": observable only now).
#[derive(Debug, Clone)]
pub struct FinishedTarget {
    pub path: String,
    pub used_mirror: Option<String>,
    pub effective_url: Option<String>,
    pub return_code: ReturnCode,
    pub error_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferLifecycle {
    Waiting,
    Running,
    Finished,
    Failed,
}

/// Scheduler-internal bookkeeping for one `DownloadTarget`, one per target,
/// for the duration of a single scheduler call (§3 `TransferState`).
pub struct TransferState {
    pub index: usize,
    pub state: TransferLifecycle,
    pub mirror: Option<MirrorHandle>,
    pub tried_mirrors: HashSet<usize>,
    /// -1 ("not yet determined") modeled as `None`.
    pub original_offset: Option<u64>,
    pub result: Mutex<TargetResult>,
}

impl TransferState {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: TransferLifecycle::Waiting,
            mirror: None,
            tried_mirrors: HashSet::new(),
            original_offset: None,
            result: Mutex::new(TargetResult::default()),
        }
    }
}
