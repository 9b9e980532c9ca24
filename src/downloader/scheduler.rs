/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! The transfer scheduler: a single-threaded cooperative event loop driving
//! N concurrent transfers (§4.I, the core of this crate).
//!
//! There is no thread pool here. One async task drives a
//! [`FuturesUnordered`] of transfer futures to completion, exactly mirroring
//! the reference design's "one OS thread, concurrency via a non-blocking
//! multi-handle" model — `FuturesUnordered` *is* the multi-handle, and
//! `.next().await` *is* the readiness wait. Mirror selection and all shared
//! bookkeeping (the pool, `TransferState`) are mutated only between awaits,
//! on this one task, so none of it needs synchronization beyond the atomics
//! already on [`MirrorState`] (kept there so a probe or façade can read them
//! concurrently without borrowing the scheduler).

use crate::digest::{self, ChecksumType};
use crate::downloader::handle::Handle;
use crate::downloader::mirror::{MirrorHandle, MirrorPool};
use crate::downloader::target::{
    Destination, DownloadTarget, FinishedTarget, ReturnCode, TransferLifecycle, TransferState,
};
use crate::error::{LibrepoError, LibrepoResult};
use crate::urlvars;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::{header, Client, StatusCode};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Installs a SIGINT handler for the lifetime of one scheduler call when
/// `Handle.interruptible` is set, and guarantees it is torn down on every
/// exit path (§9 "Replacing C idioms": scope-guard instead of an
/// install-without-matching-uninstall).
struct InterruptGuard {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl InterruptGuard {
    fn install(flag: Arc<AtomicBool>) -> Self {
        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.store(true, Ordering::SeqCst);
            }
        });
        Self { task: Some(task) }
    }

    fn none() -> Self {
        Self { task: None }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owned, self-contained description of one bound transfer attempt. Built
/// synchronously by [`TransferScheduler::prepare_next_transfer`] and then
/// executed by an independent future that touches nothing but its own
/// fields — the pool and `TransferState` are only ever mutated back on the
/// main loop, once that future resolves.
struct TransferJob {
    target_index: usize,
    mirror: Option<MirrorHandle>,
    url: String,
    file: std::fs::File,
    seek_from: u64,
    expected_size: Option<u64>,
    expected_checksums: Vec<(String, String)>,
    max_speed: u64,
    connect_timeout: Duration,
    progress_callback: Option<crate::downloader::target::ProgressCallback>,
}

struct TransferOutcome {
    target_index: usize,
    mirror: Option<MirrorHandle>,
    seek_from: u64,
    outcome: Result<Success, Failure>,
}

struct Success {
    used_mirror: Option<String>,
    effective_url: String,
}

struct Failure {
    error: LibrepoError,
    file: std::fs::File,
}

/// Drives `targets` to completion against `handle`'s mirror pool. One
/// instance is built per call; it owns the HTTP client and the pool for
/// that call's duration only (§3 "Ownership").
pub struct TransferScheduler<'a> {
    handle: &'a Handle,
    pool: MirrorPool,
    client: Client,
}

impl<'a> TransferScheduler<'a> {
    pub fn new(handle: &'a Handle, pool: MirrorPool) -> LibrepoResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(handle.connect_timeout)
            .user_agent(handle.user_agent.clone());

        if let Some(proxy_url) = &handle.proxy.url {
            let mut proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| LibrepoError::transport(proxy_url.clone(), e))?;
            if let (Some(user), Some(pass)) = (&handle.proxy.username, &handle.proxy.password) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }

        if handle.tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| LibrepoError::Transport {
                url: String::new(),
                message: e.to_string(),
                source: Some(e),
            })?;

        Ok(Self {
            handle,
            pool,
            client,
        })
    }

    pub fn mirror_pool(&self) -> &MirrorPool {
        &self.pool
    }

    /// Run one scheduler call (§4.I "Per-call setup" through "Main loop").
    pub async fn run(
        &self,
        mut targets: Vec<DownloadTarget>,
        fail_fast: bool,
    ) -> LibrepoResult<Vec<FinishedTarget>> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        std::fs::create_dir_all(&self.handle.destination_dir).map_err(|e| {
            LibrepoError::CannotCreateDir(self.handle.destination_dir.display().to_string())
                .with_io_source(e)
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(
                &self.handle.destination_dir,
                std::fs::Permissions::from_mode(0o700),
            );
        }

        let interrupted = Arc::new(AtomicBool::new(false));
        let _guard = if self.handle.interruptible {
            InterruptGuard::install(interrupted.clone())
        } else {
            InterruptGuard::none()
        };

        let mut states: Vec<TransferState> = (0..targets.len()).map(TransferState::new).collect();
        let mut in_flight = FuturesUnordered::new();
        let mut first_fatal: Option<LibrepoError> = None;
        let mut stop_scheduling = false;

        for _ in 0..self.handle.max_parallel_connections {
            if stop_scheduling {
                break;
            }
            match self.prepare_next_transfer(&targets, &mut states, fail_fast, &mut first_fatal) {
                Some(job) => in_flight.push(Self::execute(self.client.clone(), job)),
                None => {
                    if first_fatal.is_some() && fail_fast {
                        stop_scheduling = true;
                    } else {
                        break;
                    }
                }
            }
        }

        while !in_flight.is_empty() {
            tokio::select! {
                biased;
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                outcome = in_flight.next() => {
                    if let Some(outcome) = outcome {
                        self.apply_outcome(outcome, &mut targets, &mut states, fail_fast, &mut first_fatal);

                        if !stop_scheduling {
                            if let Some(job) = self.prepare_next_transfer(&targets, &mut states, fail_fast, &mut first_fatal) {
                                in_flight.push(Self::execute(self.client.clone(), job));
                            } else if first_fatal.is_some() && fail_fast {
                                stop_scheduling = true;
                            }
                        }
                    }
                }
            }

            if interrupted.load(Ordering::SeqCst) {
                return Err(LibrepoError::Interrupted);
            }
        }

        if let (true, Some(err)) = (fail_fast, first_fatal) {
            return Err(err);
        }

        Ok(states
            .iter()
            .map(|state| {
                let result = state.result.lock().unwrap();
                FinishedTarget {
                    path: targets[state.index].path.clone(),
                    used_mirror: result.used_mirror.clone(),
                    effective_url: result.effective_url.clone(),
                    return_code: result.return_code,
                    error_message: result.error_message.clone(),
                }
            })
            .collect())
    }

    /// §4.I `prepare_next_transfer`: pick one `Waiting` target and bind it to
    /// a mirror (or a direct/overridden URL), opening its destination file
    /// and computing `original_offset` along the way.
    fn prepare_next_transfer(
        &self,
        targets: &[DownloadTarget],
        states: &mut [TransferState],
        fail_fast: bool,
        first_fatal: &mut Option<LibrepoError>,
    ) -> Option<TransferJob> {
        for state in states.iter_mut() {
            if state.state != TransferLifecycle::Waiting {
                continue;
            }
            let target = &targets[state.index];

            let selection = if target.is_full_url() || target.base_url.is_some() {
                MirrorSelection::Direct
            } else {
                select_mirror(&self.pool, &state.tried_mirrors, self.handle.max_connections_per_host)
            };

            let (mirror, url) = match selection {
                MirrorSelection::Direct => {
                    let url = if let Some(base) = &target.base_url {
                        format!("{}/{}", base.trim_end_matches('/'), target.path)
                    } else {
                        target.path.clone()
                    };
                    (None, url)
                }
                MirrorSelection::Use(handle) => {
                    let mirror_state = self.pool.get(handle);
                    let url = format!("{}/{}", mirror_state.url().trim_end_matches('/'), target.path);
                    (Some(handle), url)
                }
                MirrorSelection::AllSaturated => continue,
                MirrorSelection::Exhausted => {
                    Self::fail_target(state, "all mirrors tried");
                    if fail_fast && first_fatal.is_none() {
                        *first_fatal = Some(LibrepoError::BadStatus {
                            url: target.path.clone(),
                            status: 0,
                        });
                    }
                    continue;
                }
            };

            let url = urlvars::substitute(&url, &self.handle.url_substitution_vars);

            let (file, seek_from) = match Self::open_destination(target, state.original_offset) {
                Ok(pair) => pair,
                Err(e) => {
                    Self::fail_target(state, &e.to_string());
                    if fail_fast && first_fatal.is_none() {
                        *first_fatal = Some(e);
                    }
                    continue;
                }
            };
            state.original_offset = Some(seek_from);

            if let Some(h) = mirror {
                self.pool.get(h).bind();
                state.mirror = Some(h);
                state.tried_mirrors.insert(h);
            }
            state.state = TransferLifecycle::Running;

            return Some(TransferJob {
                target_index: state.index,
                mirror,
                url,
                file,
                seek_from,
                expected_size: target.expected_size,
                expected_checksums: target.expected_checksums.clone(),
                max_speed: self.handle.max_speed,
                connect_timeout: self.handle.connect_timeout,
                progress_callback: target.progress_callback.clone(),
            });
        }

        None
    }

    /// Open (or duplicate) the destination for one transfer attempt and
    /// return the offset writes should start from (§4.I step 3-4, §3
    /// truncation invariants).
    fn open_destination(
        target: &DownloadTarget,
        original_offset: Option<u64>,
    ) -> LibrepoResult<(std::fs::File, u64)> {
        match &target.destination {
            Destination::Fd(fd) => {
                let mut dup = fd
                    .try_clone()
                    .map_err(|e| LibrepoError::io(target.destination_display(), e))?;
                let offset = if target.resume {
                    dup.seek(SeekFrom::End(0))
                        .map_err(|e| LibrepoError::io(target.destination_display(), e))?
                } else {
                    dup.set_len(0)
                        .map_err(|e| LibrepoError::io(target.destination_display(), e))?;
                    0
                };
                Ok((dup, original_offset.unwrap_or(offset)))
            }
            Destination::Path(path) => {
                let mut opts = OpenOptions::new();
                opts.create(true).read(true).write(true);
                if !target.resume {
                    opts.truncate(true);
                }
                let mut file = opts
                    .open(path)
                    .map_err(|e| LibrepoError::io(path.display().to_string(), e))?;

                let offset = if target.resume {
                    file.seek(SeekFrom::End(0))
                        .map_err(|e| LibrepoError::io(path.display().to_string(), e))?
                } else {
                    0
                };
                Ok((file, original_offset.unwrap_or(offset)))
            }
        }
    }

    fn fail_target(state: &TransferState, message: &str) {
        state_mark_failed(state, message);
    }

    /// Run one bound transfer attempt to completion. Owns everything it
    /// touches; nothing here reaches back into the scheduler's shared state.
    async fn execute(client: Client, job: TransferJob) -> TransferOutcome {
        let target_index = job.target_index;
        let mirror = job.mirror;
        let seek_from = job.seek_from;

        match Self::execute_inner(client, &job).await {
            Ok(success) => TransferOutcome {
                target_index,
                mirror,
                seek_from,
                outcome: Ok(success),
            },
            Err((error, file)) => TransferOutcome {
                target_index,
                mirror,
                seek_from,
                outcome: Err(Failure { error, file }),
            },
        }
    }

    async fn execute_inner(
        client: Client,
        job: &TransferJob,
    ) -> Result<Success, (LibrepoError, std::fs::File)> {
        let mut request = client.get(&job.url);
        if job.seek_from > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", job.seek_from));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let file = job.file.try_clone().expect("fd duplication cannot fail here");
                return Err((LibrepoError::transport(job.url.clone(), e), file));
            }
        };

        let effective_url = response.url().to_string();
        let status = response.status();
        if !(status.is_success() || status == StatusCode::PARTIAL_CONTENT) {
            let file = job.file.try_clone().expect("fd duplication cannot fail here");
            return Err((
                LibrepoError::BadStatus {
                    url: job.url.clone(),
                    status: status.as_u16(),
                },
                file,
            ));
        }

        if let Some(expected) = job.expected_size {
            if let Some(len) = response.content_length() {
                let total = if job.seek_from > 0 && status == StatusCode::PARTIAL_CONTENT {
                    job.seek_from + len
                } else {
                    len
                };
                if total != expected {
                    let file = job.file.try_clone().expect("fd duplication cannot fail here");
                    return Err((
                        LibrepoError::BadStatus {
                            url: job.url.clone(),
                            status: status.as_u16(),
                        },
                        file,
                    ));
                }
            }
        }

        let file = job
            .file
            .try_clone()
            .map_err(|e| (LibrepoError::io(job.url.clone(), e), {
                job.file.try_clone().expect("fd duplication cannot fail here")
            }))?;
        let mut out = tokio::fs::File::from_std(file);
        if let Err(e) = out.seek(SeekFrom::Start(job.seek_from)).await {
            let file = job.file.try_clone().expect("fd duplication cannot fail here");
            return Err((LibrepoError::io(job.url.clone(), e), file));
        }

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let start = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let file = out.into_std().await;
                    return Err((LibrepoError::transport(job.url.clone(), e), file));
                }
            };
            if let Err(e) = out.write_all(&chunk).await {
                let file = out.into_std().await;
                return Err((LibrepoError::io(job.url.clone(), e), file));
            }
            written += chunk.len() as u64;

            if let Some(cb) = &job.progress_callback {
                if !cb(job.seek_from + written, job.expected_size.unwrap_or(0)) {
                    let file = out.into_std().await;
                    return Err((
                        LibrepoError::BadArgument("transfer aborted by progress callback".into()),
                        file,
                    ));
                }
            }

            if job.max_speed > 0 {
                let elapsed = start.elapsed().as_secs_f64();
                let allowed = elapsed * job.max_speed as f64;
                if (written as f64) > allowed {
                    let overage = (written as f64 - allowed) / job.max_speed as f64;
                    tokio::time::sleep(Duration::from_secs_f64(overage)).await;
                }
            }
        }

        if let Err(e) = out.flush().await {
            let file = out.into_std().await;
            return Err((LibrepoError::io(job.url.clone(), e), file));
        }

        let written_file = out.into_std().await;

        if !job.expected_checksums.is_empty() {
            let mut verify_file = written_file
                .try_clone()
                .map_err(|e| (LibrepoError::io(job.url.clone(), e), {
                    written_file.try_clone().expect("fd duplication cannot fail here")
                }))?;
            let checksums = job.expected_checksums.clone();
            let job_url = job.url.clone();

            let verify = tokio::task::spawn_blocking(move || {
                verify_file
                    .seek(SeekFrom::Start(0))
                    .map_err(|e| LibrepoError::io("<fd>", e))?;
                for (algo_name, expected) in &checksums {
                    if let Some(algo) = ChecksumType::from_name(algo_name) {
                        if let Ok(cmp) = digest::compare(algo, &mut verify_file, expected, true) {
                            if cmp.matches {
                                return Ok(());
                            }
                        }
                    }
                }
                Err(LibrepoError::BadChecksum {
                    file: job_url,
                    expected: checksums.iter().map(|(_, h)| h.clone()).collect(),
                    actual: String::new(),
                })
            })
            .await;

            match verify {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err((e, written_file)),
                Err(join_err) => {
                    return Err((
                        LibrepoError::Io {
                            path: job.url.clone(),
                            message: join_err.to_string(),
                            source: None,
                        },
                        written_file,
                    ))
                }
            }
        }

        Ok(Success {
            used_mirror: None,
            effective_url,
        })
    }

    /// §4.I "Completion handling": apply one resolved transfer back onto the
    /// shared pool, `TransferState`, and result slots.
    fn apply_outcome(
        &self,
        outcome: TransferOutcome,
        targets: &mut [DownloadTarget],
        states: &mut [TransferState],
        fail_fast: bool,
        first_fatal: &mut Option<LibrepoError>,
    ) {
        let state = &mut states[outcome.target_index];
        let mirror_url = outcome
            .mirror
            .map(|h| self.pool.get(h).url().to_string());

        match outcome.outcome {
            Ok(success) => {
                if let Some(h) = outcome.mirror {
                    self.pool.get(h).unbind_success();
                }
                state.state = TransferLifecycle::Finished;
                let mut result = state.result.lock().unwrap();
                result.used_mirror = mirror_url;
                result.effective_url = Some(success.effective_url);
                result.return_code = ReturnCode::Ok;
                result.error_message.clear();
                drop(result);

                if let Some(cb) = &targets[outcome.target_index].end_callback {
                    let snapshot = FinishedTarget {
                        path: targets[outcome.target_index].path.clone(),
                        used_mirror: state.result.lock().unwrap().used_mirror.clone(),
                        effective_url: state.result.lock().unwrap().effective_url.clone(),
                        return_code: ReturnCode::Ok,
                        error_message: String::new(),
                    };
                    cb(&snapshot);
                }
            }
            Err(failure) => {
                if let Some(h) = outcome.mirror {
                    self.pool.get(h).unbind_failure();
                }

                let _ = failure.file.set_len(outcome.seek_from);

                let target = &targets[outcome.target_index];
                let bypassed_mirrors = target.is_full_url() || target.base_url.is_some();
                let retries_exhausted = self.handle.max_mirror_retries > 0
                    && state.tried_mirrors.len() as i64 >= self.handle.max_mirror_retries;

                let mut should_retry = !bypassed_mirrors && !retries_exhausted;

                if let Some(cb) = &target.mirror_failure_callback {
                    let url = mirror_url.clone().unwrap_or_else(|| target.path.clone());
                    if !cb(&url, &failure.error.to_string()) {
                        should_retry = false;
                    }
                }

                if should_retry {
                    state.state = TransferLifecycle::Waiting;
                } else {
                    state.state = TransferLifecycle::Failed;
                    let mut result = state.result.lock().unwrap();
                    result.used_mirror = mirror_url;
                    result.return_code = ReturnCode::Failed;
                    result.error_message = failure.error.to_string();
                    drop(result);

                    if fail_fast && first_fatal.is_none() {
                        *first_fatal = Some(failure.error);
                    }
                }
            }
        }
    }
}

fn state_mark_failed(state: &TransferState, message: &str) {
    // `state` arrives as `&TransferState` from an iterator over `&mut
    // [TransferState]`; the lifecycle field itself is set by the caller
    // (it holds the `&mut` at that point), this only fills result slots.
    let mut result = state.result.lock().unwrap();
    result.return_code = ReturnCode::Failed;
    result.error_message = message.to_string();
}

enum MirrorSelection {
    Direct,
    Use(MirrorHandle),
    /// Untried mirrors exist but all are at their per-host cap right now.
    AllSaturated,
    /// Every mirror in the pool has already been tried for this target.
    Exhausted,
}

fn select_mirror(
    pool: &MirrorPool,
    tried: &std::collections::HashSet<MirrorHandle>,
    max_connections_per_host: i64,
) -> MirrorSelection {
    let mut saw_untried = false;
    for (handle, state) in pool.iter() {
        if tried.contains(&handle) {
            continue;
        }
        saw_untried = true;
        if !state.saturated(max_connections_per_host) {
            return MirrorSelection::Use(handle);
        }
    }
    if saw_untried {
        MirrorSelection::AllSaturated
    } else {
        MirrorSelection::Exhausted
    }
}

impl LibrepoError {
    fn with_io_source(self, source: std::io::Error) -> Self {
        match self {
            LibrepoError::CannotCreateDir(path) => LibrepoError::Io {
                path,
                message: source.to_string(),
                source: Some(source),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::mirror::Mirror;

    #[test]
    fn test_select_mirror_skips_tried_and_saturated() {
        let mut pool = MirrorPool::new();
        let m1 = pool.push(Mirror::new("http://m1", 100));
        let m2 = pool.push(Mirror::new("http://m2", 100));
        pool.get(m1).bind();
        pool.get(m1).bind();

        let tried = std::collections::HashSet::new();
        match select_mirror(&pool, &tried, 2) {
            MirrorSelection::Use(h) => assert_eq!(h, m2),
            _ => panic!("expected m2"),
        }

        let mut tried_both = std::collections::HashSet::new();
        tried_both.insert(m1);
        tried_both.insert(m2);
        assert!(matches!(
            select_mirror(&pool, &tried_both, 2),
            MirrorSelection::Exhausted
        ));
    }

    #[test]
    fn test_select_mirror_all_saturated_is_not_exhausted() {
        let mut pool = MirrorPool::new();
        let m1 = pool.push(Mirror::new("http://m1", 100));
        pool.get(m1).bind();
        pool.get(m1).bind();

        let tried = std::collections::HashSet::new();
        assert!(matches!(
            select_mirror(&pool, &tried, 2),
            MirrorSelection::AllSaturated
        ));
    }
}
