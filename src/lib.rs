/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! librepo-rs: a client library for fetching RPM-style package-repository
//! content — the `repomd.xml` index, the data files it references, and
//! individual packages — over a pool of HTTP(S), FTP, or `file://` mirrors.
//!
//! The entry points are [`downloader::Handle`] (per-repository
//! configuration), [`downloader::fetch_metadata`] (the metadata flow, §4.J),
//! and [`downloader::download_packages`] (the package façade, §4.K). Both
//! ultimately drive a [`downloader::TransferScheduler`], a single-threaded
//! cooperative event loop (§4.I) that is the core of this crate.
//!
//! ```no_run
//! use librepo::downloader::Handle;
//!
//! # async fn run() -> librepo::error::LibrepoResult<()> {
//! let handle = Handle::builder()
//!     .urls(vec!["https://mirror.example/fedora/releases/40/Everything/x86_64/os".to_string()])
//!     .destination_dir("/tmp/repo-cache")
//!     .build();
//!
//! let metadata = librepo::downloader::fetch_metadata(&handle).await?;
//! println!("fetched {} records", metadata.repomd.record_count());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod digest;
pub mod discovery;
pub mod downloader;
pub mod error;
pub mod fastest_mirror;
pub mod logging;
pub mod metalink;
pub mod mirrorlist;
pub mod repomd;
pub mod signature;
pub mod urlvars;

pub use downloader::{download_packages, fetch_metadata, Handle, HandleBuilder, PackageTarget};
pub use error::{LibrepoError, LibrepoResult};
