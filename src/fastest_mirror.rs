/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Fastest-mirror probe (§4.M): an optional latency probe that reorders the
//! mirror pool once, before the first metadata request.
//!
//! §9 open question: the reference implementation never specifies the
//! on-disk cache's validity criteria. This crate keys a cache entry by a
//! digest of the sorted, deduplicated mirror URL set and a fixed TTL
//! (default 6h, configured on `Handle`, matching the mirrorlist-caching
//! interval used elsewhere in the ecosystem); an entry is valid only if both
//! the key and the age match.

use crate::downloader::mirror::MirrorPool;
use crate::error::{LibrepoError, LibrepoResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    cached_at_secs: u64,
    /// Mirror URLs ordered by ascending latency at probe time.
    order: Vec<String>,
}

/// Digest the sorted, deduplicated mirror URL set into a stable cache key.
fn cache_key(urls: &[String]) -> String {
    let mut sorted: Vec<&str> = urls.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    for url in sorted {
        hasher.update(url.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Probe each mirror in `pool` with a lightweight `HEAD` request and record
/// its round-trip time. Mirrors that fail to respond sort last, in their
/// original relative order (a failed probe is not a reason to drop a mirror
/// entirely — it may still serve the real request).
pub async fn probe_latencies(client: &Client, pool: &MirrorPool) -> Vec<(String, Option<Duration>)> {
    let mut results = Vec::with_capacity(pool.len());
    for (_, state) in pool.iter() {
        let url = state.url().to_string();
        let start = Instant::now();
        let latency = match client.head(&url).send().await {
            Ok(resp) if resp.status().is_success() || resp.status().as_u16() < 500 => {
                Some(start.elapsed())
            }
            _ => None,
        };
        results.push((url, latency));
    }
    results
}

/// Reorder `pool` in place by ascending latency, probing fresh or honoring a
/// fresh cache entry at `cache_path` when both mirror set and TTL match.
pub async fn apply_fastest_mirror(
    client: &Client,
    pool: &mut MirrorPool,
    cache_path: Option<&Path>,
    ttl: Duration,
) -> LibrepoResult<()> {
    if pool.is_empty() {
        return Ok(());
    }

    let urls = pool.urls();
    let key = cache_key(&urls);

    if let Some(path) = cache_path {
        if let Some(entry) = load_cache(path) {
            let age = now_secs().saturating_sub(entry.cached_at_secs);
            if entry.key == key && age < ttl.as_secs() {
                reorder_by_urls(pool, &entry.order);
                return Ok(());
            }
        }
    }

    let mut latencies = probe_latencies(client, pool).await;
    latencies.sort_by(|a, b| match (a.1, b.1) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    let order: Vec<String> = latencies.into_iter().map(|(url, _)| url).collect();
    reorder_by_urls(pool, &order);

    if let Some(path) = cache_path {
        let entry = CacheEntry {
            key,
            cached_at_secs: now_secs(),
            order,
        };
        let _ = save_cache(path, &entry);
    }

    Ok(())
}

fn reorder_by_urls(pool: &mut MirrorPool, order: &[String]) {
    let handles: Vec<usize> = order
        .iter()
        .filter_map(|url| pool.iter().find(|(_, s)| s.url() == url).map(|(h, _)| h))
        .collect();
    if handles.len() == pool.len() {
        pool.reorder_by(&handles);
    }
}

fn load_cache(path: &Path) -> Option<CacheEntry> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn save_cache(path: &Path, entry: &CacheEntry) -> LibrepoResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LibrepoError::io(parent.display().to_string(), e))?;
    }
    let json = serde_json::to_string(entry).map_err(|e| LibrepoError::Config(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| LibrepoError::io(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_order_independent() {
        let a = cache_key(&["http://b".to_string(), "http://a".to_string()]);
        let b = cache_key(&["http://a".to_string(), "http://b".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_ignores_duplicates() {
        let a = cache_key(&["http://a".to_string(), "http://a".to_string()]);
        let b = cache_key(&["http://a".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fastest_mirror_cache.json");
        let entry = CacheEntry {
            key: "abc".to_string(),
            cached_at_secs: now_secs(),
            order: vec!["http://m1".to_string(), "http://m2".to_string()],
        };
        save_cache(&path, &entry).unwrap();
        let loaded = load_cache(&path).unwrap();
        assert_eq!(loaded.key, entry.key);
        assert_eq!(loaded.order, entry.order);
    }
}
