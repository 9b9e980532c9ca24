/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Package-download façade (§4.K): map caller-supplied package requests onto
//! `DownloadTarget`s and delegate to the scheduler, skipping anything that's
//! already present and verified.

use crate::digest::ChecksumType;
use crate::downloader::handle::Handle;
use crate::downloader::mirror::MirrorPool;
use crate::downloader::scheduler::TransferScheduler;
use crate::downloader::target::{DownloadTarget, FinishedTarget, ReturnCode};
use crate::error::{LibrepoError, LibrepoResult};
use std::path::{Path, PathBuf};

/// One caller-requested package (§4.K).
#[derive(Debug, Clone)]
pub struct PackageTarget {
    /// Relative path under a mirror, or a full URL.
    pub relative_url: String,
    /// Where to put it: a directory (basename of `relative_url` is appended),
    /// an exact file path, or unset (falls back to `Handle.destination_dir`).
    pub destination: Option<PathBuf>,
    pub destination_is_dir: bool,
    pub expected_checksums: Vec<(String, String)>,
    pub expected_size: Option<u64>,
}

impl PackageTarget {
    pub fn new(relative_url: impl Into<String>) -> Self {
        Self {
            relative_url: relative_url.into(),
            destination: None,
            destination_is_dir: false,
            expected_checksums: Vec::new(),
            expected_size: None,
        }
    }

    pub fn with_destination_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.destination = Some(dir.into());
        self.destination_is_dir = true;
        self
    }

    pub fn with_destination_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self.destination_is_dir = false;
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

    fn resolve_destination(&self, handle: &Handle) -> PathBuf {
        let basename = Path::new(&self.relative_url)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&self.relative_url));

        match &self.destination {
            Some(dir) if self.destination_is_dir => dir.join(basename),
            Some(path) => path.clone(),
            None => handle.destination_dir.join(basename),
        }
    }
}

/// Already on disk and verified against every supplied checksum (§4.K:
/// "skip the download and report already downloaded").
fn already_satisfied(path: &Path, checksums: &[(String, String)]) -> bool {
    if checksums.is_empty() || !path.is_file() {
        return false;
    }

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };

    checksums.iter().any(|(algo_name, expected)| {
        ChecksumType::from_name(algo_name)
            .and_then(|algo| crate::digest::compare(algo, &mut file, expected, true).ok())
            .map(|cmp| cmp.matches)
            .unwrap_or(false)
    })
}

/// Run the package façade for `targets` against `handle`'s mirror pool
/// (§4.K). Targets already present and verified are reported as
/// `ReturnCode::Ok` with no network activity; `fail_fast` turns
/// `AlreadyDownloaded` from informational into a propagated error, matching
/// the scheduler's own `fail_fast` contract.
pub async fn download_packages(
    handle: &Handle,
    targets: Vec<PackageTarget>,
    fail_fast: bool,
) -> LibrepoResult<Vec<FinishedTarget>> {
    let mut already_done = Vec::new();
    let mut pending = Vec::new();

    for pkg in targets {
        let dest = pkg.resolve_destination(handle);
        if already_satisfied(&dest, &pkg.expected_checksums) {
            let finished = FinishedTarget {
                path: pkg.relative_url.clone(),
                used_mirror: None,
                effective_url: None,
                return_code: ReturnCode::Ok,
                error_message: String::new(),
            };
            if fail_fast {
                return Err(LibrepoError::AlreadyDownloaded(pkg.relative_url));
            }
            already_done.push(finished);
            continue;
        }

        let mut target = DownloadTarget::to_path(pkg.relative_url.clone(), dest)
            .with_resume(handle.resume_downloads)
            .with_checksums(pkg.expected_checksums.clone());
        if let Some(size) = pkg.expected_size {
            target = target.with_expected_size(size);
        }
        pending.push(target);
    }

    if pending.is_empty() {
        return Ok(already_done);
    }

    let pool = MirrorPool::from_urls(handle.urls.clone());
    let scheduler = TransferScheduler::new(handle, pool)?;
    let mut finished = scheduler.run(pending, fail_fast).await?;
    finished.append(&mut already_done);
    Ok(finished)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_destination_dir_joins_basename() {
        let handle = Handle::default();
        let pkg = PackageTarget::new("repo/pkgs/foo-1.0.rpm")
            .with_destination_dir("/var/cache/packages");
        assert_eq!(
            pkg.resolve_destination(&handle),
            PathBuf::from("/var/cache/packages/foo-1.0.rpm")
        );
    }

    #[test]
    fn test_resolve_destination_exact_path_used_as_is() {
        let handle = Handle::default();
        let pkg = PackageTarget::new("repo/pkgs/foo-1.0.rpm")
            .with_destination_path("/tmp/exact-name.rpm");
        assert_eq!(
            pkg.resolve_destination(&handle),
            PathBuf::from("/tmp/exact-name.rpm")
        );
    }

    #[test]
    fn test_resolve_destination_falls_back_to_handle_dir() {
        let handle = Handle::builder().destination_dir("/srv/cache").build();
        let pkg = PackageTarget::new("repo/pkgs/foo-1.0.rpm");
        assert_eq!(
            pkg.resolve_destination(&handle),
            PathBuf::from("/srv/cache/foo-1.0.rpm")
        );
    }

    #[test]
    fn test_already_satisfied_false_when_no_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rpm");
        std::fs::write(&path, b"data").unwrap();
        assert!(!already_satisfied(&path, &[]));
    }
}
