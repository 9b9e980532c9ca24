/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Mirror-list / metalink discovery glue (§2 "discovery glue", §4.G): fetch a
//! `mirrorlist_url` or `metalink_url`, parse it with the right parser, and
//! feed the result into a [`MirrorPool`] alongside `Handle.urls`.

use crate::downloader::handle::Handle;
use crate::downloader::mirror::{Mirror, MirrorPool};
use crate::error::{LibrepoError, LibrepoResult};
use crate::metalink::{self, Metalink};
use crate::mirrorlist;
use reqwest::Client;
use std::path::Path;

/// Fetch the text content of `url`, which may be `http(s)://`, `file://`, or
/// a bare local path (as mirrorlist/metalink URLs sometimes are).
pub async fn fetch_text(client: &Client, url: &str) -> LibrepoResult<String> {
    if let Some(path) = url.strip_prefix("file://") {
        return read_local(Path::new(path));
    }
    if !url.contains("://") {
        return read_local(Path::new(url));
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| LibrepoError::transport(url.to_string(), e))?;

    if !response.status().is_success() {
        return Err(LibrepoError::BadStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    response
        .text()
        .await
        .map_err(|e| LibrepoError::transport(url.to_string(), e))
}

fn read_local(path: &Path) -> LibrepoResult<String> {
    std::fs::read_to_string(path).map_err(|e| LibrepoError::io(path.display().to_string(), e))
}

/// Decide whether `content` (fetched from `url`) is a metalink document
/// rather than a plain mirrorlist. The reference design leaves the exact
/// sniffing rule unspecified (§4.J step 2: "determined by URL pattern or
/// content sniff"); this crate checks both the URL's extension and, failing
/// that, the document's opening tag.
pub fn looks_like_metalink(url: &str, content: &str) -> bool {
    let lower_url = url.to_ascii_lowercase();
    if lower_url.ends_with(".metalink") || lower_url.ends_with(".meta4") || lower_url.contains("metalink") {
        return true;
    }
    let head = content.trim_start();
    head.len() > 0 && {
        // Skip an optional XML declaration before looking for the root tag.
        let after_decl = if head.starts_with("<?xml") {
            head.find("?>").map(|i| &head[i + 2..]).unwrap_or(head)
        } else {
            head
        };
        after_decl.trim_start().starts_with("<metalink")
    }
}

/// Result of running discovery for one scheduler call targeting
/// `target_filename` (always `repomd.xml` in the metadata flow, §4.J).
pub struct Discovery {
    pub pool: MirrorPool,
    /// Present only when a metalink was fetched and it described
    /// `target_filename` (§4.G: "Mirror-pool URLs learned from metalink carry
    /// the metalink's hashes for `repomd.xml`").
    pub metalink: Option<Metalink>,
}

/// Build the mirror pool for `handle`, merging explicit `urls` first (highest
/// preference) and then whichever of `mirrorlist_url`/`metalink_url` is
/// configured (§4.G).
pub async fn discover(
    client: &Client,
    handle: &Handle,
    target_filename: &str,
) -> LibrepoResult<Discovery> {
    let mut pool = MirrorPool::from_urls(handle.urls.clone());
    let mut metalink_result = None;

    if let Some(url) = &handle.metalink_url {
        let content = fetch_text(client, url).await?;
        let parsed = metalink::parse(&content, target_filename)?;
        for mirror_url in &parsed.urls {
            pool.push(Mirror::new(mirror_url.url.clone(), mirror_url.preference));
        }
        metalink_result = Some(parsed);
    } else if let Some(url) = &handle.mirrorlist_url {
        let content = fetch_text(client, url).await?;
        if looks_like_metalink(url, &content) {
            let parsed = metalink::parse(&content, target_filename)?;
            for mirror_url in &parsed.urls {
                pool.push(Mirror::new(mirror_url.url.clone(), mirror_url.preference));
            }
            metalink_result = Some(parsed);
        } else {
            let urls = mirrorlist::parse(&content)?;
            for url in urls {
                pool.push(Mirror::new(url, 0));
            }
        }
    }

    if pool.is_empty() {
        return Err(LibrepoError::NoUrl);
    }

    Ok(Discovery {
        pool,
        metalink: metalink_result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_metalink_by_extension() {
        assert!(looks_like_metalink("http://host/repo.metalink", "whatever"));
        assert!(looks_like_metalink("http://host/repo.meta4", "whatever"));
    }

    #[test]
    fn test_looks_like_metalink_by_content_sniff() {
        let content = "<?xml version=\"1.0\"?>\n<metalink version=\"3.0\">\n</metalink>";
        assert!(looks_like_metalink("http://host/mirrorlist", content));
    }

    #[test]
    fn test_plain_mirrorlist_is_not_metalink() {
        let content = "http://mirror1.example/repo/\nhttp://mirror2.example/repo/\n";
        assert!(!looks_like_metalink("http://host/mirrorlist", content));
    }
}
