/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Streaming digest engine with xattr-cached lookup/store (§4.A).

use crate::error::{LibrepoError, LibrepoResult};
use digest::Digest;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::time::UNIX_EPOCH;

/// Block size used when streaming a file descriptor through the digest
/// context. 2 KiB matches the reference implementation; there is nothing
/// magic about the number beyond "small enough to not blow a stack buffer,
/// large enough to avoid a syscall per byte".
const BUFFER_SIZE: usize = 2048;

const XATTR_PREFIX: &str = "user.Librepo.checksum.";
const XATTR_MTIME: &str = "user.Librepo.checksum.mtime";

/// Checksum algorithms recognized by the digest engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumType {
    /// Case-insensitive name matching the family `md5`, `sha1` (bare `sha`
    /// also accepted), `sha224`, `sha256`, `sha384`, `sha512`.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("md") {
            let suffix = &lower[2..];
            if suffix == "5" {
                return Some(ChecksumType::Md5);
            }
        }
        if let Some(suffix) = lower.strip_prefix("sha") {
            return match suffix {
                "" | "1" => Some(ChecksumType::Sha1),
                "224" => Some(ChecksumType::Sha224),
                "256" => Some(ChecksumType::Sha256),
                "384" => Some(ChecksumType::Sha384),
                "512" => Some(ChecksumType::Sha512),
                _ => None,
            };
        }
        None
    }

    /// Lowercase canonical name, used both for display and as the xattr
    /// attribute suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha224 => "sha224",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha384 => "sha384",
            ChecksumType::Sha512 => "sha512",
        }
    }

    fn xattr_name(&self) -> String {
        format!("{}{}", XATTR_PREFIX, self.as_str())
    }
}

/// Result of a `compare` call.
#[derive(Debug, Clone)]
pub struct CompareResult {
    pub matches: bool,
    pub actual: Option<String>,
}

/// Compute the digest of `algo` over the bytes remaining in `file` from its
/// current position. Does not seek or close the file; the caller owns both.
pub fn compute(algo: ChecksumType, file: &mut File) -> LibrepoResult<String> {
    let mut buf = [0u8; BUFFER_SIZE];

    macro_rules! hash_with {
        ($hasher:expr) => {{
            let mut hasher = $hasher;
            loop {
                let read = file
                    .read(&mut buf)
                    .map_err(|e| LibrepoError::io("<fd>", e))?;
                if read == 0 {
                    break;
                }
                hasher.update(&buf[..read]);
            }
            hex::encode(hasher.finalize())
        }};
    }

    let digest = match algo {
        ChecksumType::Md5 => hash_with!(md5::Md5::new()),
        ChecksumType::Sha1 => hash_with!(sha1::Sha1::new()),
        ChecksumType::Sha224 => hash_with!(sha2::Sha224::new()),
        ChecksumType::Sha256 => hash_with!(sha2::Sha256::new()),
        ChecksumType::Sha384 => hash_with!(sha2::Sha384::new()),
        ChecksumType::Sha512 => hash_with!(sha2::Sha512::new()),
    };

    Ok(digest)
}

/// Compare the digest of `algo` over `file` against `expected` (a hex
/// string, compared case-insensitively). When `use_cache` is set, consult
/// and (on a confirming miss) populate the xattr cache described in §4.A.
pub fn compare(
    algo: ChecksumType,
    file: &mut File,
    expected: &str,
    use_cache: bool,
) -> LibrepoResult<CompareResult> {
    let expected_lower = expected.to_ascii_lowercase();

    if use_cache {
        if let Some(cached) = read_cache(file, algo)? {
            return Ok(CompareResult {
                matches: cached.eq_ignore_ascii_case(&expected_lower),
                actual: Some(cached),
            });
        }
    }

    file.seek(SeekFrom::Start(0))
        .map_err(|e| LibrepoError::io("<fd>", e))?;
    let actual = compute(algo, file)?;
    let matches = actual.eq_ignore_ascii_case(&expected_lower);

    if use_cache && matches {
        // Only cache digests the caller has confirmed correct (§9 Open
        // Question 1) — mirrors checksum.c's `ret == 0` guard around
        // fsetxattr exactly.
        write_cache(file, algo, &actual);
    }

    Ok(CompareResult {
        matches,
        actual: Some(actual),
    })
}

/// Remove every extended attribute under the `user.Librepo.checksum.`
/// prefix from `file`. Best-effort: filesystems without xattr support are
/// silently treated as "nothing to clear".
pub fn clear_cache(file: &File) -> LibrepoResult<()> {
    let names = match xattr::list(path_of(file)) {
        Ok(names) => names,
        Err(_) => return Ok(()),
    };

    for name in names {
        if let Some(name_str) = name.to_str() {
            if name_str.starts_with(XATTR_PREFIX) {
                let _ = xattr::remove(path_of(file), &name);
            }
        }
    }

    Ok(())
}

fn read_cache(file: &mut File, algo: ChecksumType) -> LibrepoResult<Option<String>> {
    let meta = file.metadata().map_err(|e| LibrepoError::io("<fd>", e))?;
    let current_mtime_ns = mtime_ns(&meta);

    let stored_mtime = match xattr::get(path_of(file), XATTR_MTIME) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Ok(None),
        Err(_) => return Ok(None), // xattrs unsupported: best-effort "no cache"
    };

    let stored_mtime_str = String::from_utf8_lossy(&stored_mtime);
    let stored_mtime_ns: u128 = match stored_mtime_str.parse() {
        Ok(n) => n,
        Err(_) => return Ok(None),
    };

    if stored_mtime_ns != current_mtime_ns {
        return Ok(None);
    }

    match xattr::get(path_of(file), algo.xattr_name()) {
        Ok(Some(bytes)) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
        _ => Ok(None),
    }
}

fn write_cache(file: &File, algo: ChecksumType, digest: &str) {
    let meta = match file.metadata() {
        Ok(m) => m,
        Err(_) => return,
    };
    let mtime_ns = mtime_ns(&meta);
    let _ = xattr::set(path_of(file), XATTR_MTIME, mtime_ns.to_string().as_bytes());
    let _ = xattr::set(path_of(file), algo.xattr_name(), digest.as_bytes());
}

fn mtime_ns(meta: &std::fs::Metadata) -> u128 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// xattr's path-based API needs a path, not a raw fd; `/proc/self/fd/<n>`
/// gives us one without requiring the caller to have opened by path. Falls
/// back cleanly: if `/proc` is unavailable the xattr calls above simply
/// error and are treated as "no cache" per the best-effort contract.
fn path_of(file: &File) -> std::path::PathBuf {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        std::path::PathBuf::from(format!("/proc/self/fd/{}", file.as_raw_fd()))
    }
    #[cfg(not(unix))]
    {
        std::path::PathBuf::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_checksum_type_recognition() {
        assert_eq!(ChecksumType::from_name("MD5"), Some(ChecksumType::Md5));
        assert_eq!(ChecksumType::from_name("sha"), Some(ChecksumType::Sha1));
        assert_eq!(ChecksumType::from_name("SHA1"), Some(ChecksumType::Sha1));
        assert_eq!(ChecksumType::from_name("sha256"), Some(ChecksumType::Sha256));
        assert_eq!(ChecksumType::from_name("sha512"), Some(ChecksumType::Sha512));
        assert_eq!(ChecksumType::from_name("crc32"), None);
    }

    #[test]
    fn test_compute_sha256() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello world").unwrap();
        let mut file = File::open(&path).unwrap();

        let digest = compute(ChecksumType::Sha256, &mut file).unwrap();
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_compute_is_reproducible_from_offset_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"reproducible bytes").unwrap();

        let mut file1 = File::open(&path).unwrap();
        let d1 = compute(ChecksumType::Sha256, &mut file1).unwrap();

        let mut file2 = File::open(&path).unwrap();
        d1_matches_second_read(&mut file2, &d1);
    }

    fn d1_matches_second_read(file: &mut File, expected: &str) {
        let d2 = compute(ChecksumType::Sha256, file).unwrap();
        assert_eq!(expected, d2);
    }

    #[test]
    fn test_cache_hit_without_recompute() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(b"cached content").unwrap();
        }

        let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let actual = compute(ChecksumType::Sha256, &mut file).unwrap();

        // First compare populates the cache (digest matches itself).
        let first = compare(ChecksumType::Sha256, &mut file, &actual, true);
        if first.is_err() {
            // xattrs unsupported on this filesystem (e.g. overlayfs in CI) —
            // caching is best-effort, so skip rather than fail.
            return;
        }
        assert!(first.unwrap().matches);

        // Corrupt the in-memory expectation but keep mtime identical: a
        // real cache hit trusts the cached value without re-reading.
        let second = compare(ChecksumType::Sha256, &mut file, &actual, true).unwrap();
        assert!(second.matches);
    }

    #[test]
    fn test_clear_cache_is_noop_when_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"x").unwrap();
        let file = File::open(&path).unwrap();
        assert!(clear_cache(&file).is_ok());
    }
}
