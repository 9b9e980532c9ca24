/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Ordered mirror pool with per-mirror in-flight/success/failure counters
//! (§3 `Mirror`/`MirrorState`, §4.G).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A candidate source URL, as contributed by `Handle.urls` or by discovery
/// (mirrorlist/metalink).
#[derive(Debug, Clone)]
pub struct Mirror {
    pub url: String,
    /// Discovery-supplied hint, 0..100. Explicit `Handle.urls` entries get
    /// the highest preference (100); metalink/mirrorlist entries carry
    /// whatever preference discovery attached (§4.G).
    pub preference: i32,
    pub known_failures: u64,
}

impl Mirror {
    pub fn new(url: impl Into<String>, preference: i32) -> Self {
        Self {
            url: url.into(),
            preference,
            known_failures: 0,
        }
    }
}

/// Scheduler-internal view of a `Mirror` (§3 `MirrorState`). `running`,
/// `successful`, and `failed` are atomics so the pool can be shared
/// read-only across the async tasks cooperating on one scheduler call
/// while still being mutated by whichever task completes a transfer.
#[derive(Debug)]
pub struct MirrorState {
    pub mirror: Mirror,
    running: AtomicI64,
    successful: AtomicU64,
    failed: AtomicU64,
}

impl MirrorState {
    pub fn new(mirror: Mirror) -> Self {
        Self {
            mirror,
            running: AtomicI64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.mirror.url
    }

    pub fn running_transfers(&self) -> i64 {
        self.running.load(Ordering::SeqCst)
    }

    pub fn successful_transfers(&self) -> u64 {
        self.successful.load(Ordering::SeqCst)
    }

    pub fn failed_transfers(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Incremented when a transfer is bound to this mirror; decremented on
    /// completion regardless of outcome (§3 invariant).
    pub fn bind(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unbind_success(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.successful.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unbind_failure(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    /// `true` once `running_transfers` has reached `max_connections_per_host`
    /// (a negative cap, per Handle convention, disables the check).
    pub fn saturated(&self, max_connections_per_host: i64) -> bool {
        max_connections_per_host >= 0 && self.running_transfers() >= max_connections_per_host
    }
}

/// Opaque handle into the pool's backing storage, cheap to copy and hold
/// inside a `TransferState` without borrowing the pool itself.
pub type MirrorHandle = usize;

/// Ordered collection of `MirrorState`s for one scheduler call (§4.G).
///
/// Built by merging, in order: explicit `Handle.urls` (preference 100),
/// then mirrorlist/metalink discovery results. An optional fastest-mirror
/// probe (§4.M) may reorder the pool once, before the first metadata
/// request; the scheduler itself never reorders it.
#[derive(Debug, Default)]
pub struct MirrorPool {
    mirrors: Vec<MirrorState>,
}

impl MirrorPool {
    pub fn new() -> Self {
        Self { mirrors: Vec::new() }
    }

    pub fn push(&mut self, mirror: Mirror) -> MirrorHandle {
        self.mirrors.push(MirrorState::new(mirror));
        self.mirrors.len() - 1
    }

    pub fn from_urls(urls: impl IntoIterator<Item = String>) -> Self {
        let mut pool = Self::new();
        for url in urls {
            pool.push(Mirror::new(url, 100));
        }
        pool
    }

    pub fn get(&self, handle: MirrorHandle) -> &MirrorState {
        &self.mirrors[handle]
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MirrorHandle, &MirrorState)> {
        self.mirrors.iter().enumerate()
    }

    /// Reorder the pool in place by ascending latency, as produced by the
    /// fastest-mirror probe (§4.M). Only meaningful before the first
    /// transfer is bound; the scheduler never calls this itself.
    pub fn reorder_by(&mut self, order: &[MirrorHandle]) {
        let reordered: Vec<MirrorState> = order
            .iter()
            .map(|&idx| {
                let m = &self.mirrors[idx];
                MirrorState::new(m.mirror.clone())
            })
            .collect();
        self.mirrors = reordered;
    }

    /// All mirror URLs in pool order, e.g. for cache-key computation (§4.M).
    pub fn urls(&self) -> Vec<String> {
        self.mirrors.iter().map(|m| m.url().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_unbind_running_returns_to_zero() {
        let mut pool = MirrorPool::new();
        let h = pool.push(Mirror::new("http://m1", 100));
        pool.get(h).bind();
        assert_eq!(pool.get(h).running_transfers(), 1);
        pool.get(h).unbind_success();
        assert_eq!(pool.get(h).running_transfers(), 0);
        assert_eq!(pool.get(h).successful_transfers(), 1);
    }

    #[test]
    fn test_saturated_respects_negative_disables_cap() {
        let mut pool = MirrorPool::new();
        let h = pool.push(Mirror::new("http://m1", 100));
        for _ in 0..10 {
            pool.get(h).bind();
        }
        assert!(pool.get(h).saturated(2));
        assert!(!pool.get(h).saturated(-1));
    }

    #[test]
    fn test_from_urls_preserves_order() {
        let pool = MirrorPool::from_urls(vec!["http://a".to_string(), "http://b".to_string()]);
        assert_eq!(pool.urls(), vec!["http://a".to_string(), "http://b".to_string()]);
    }
}
