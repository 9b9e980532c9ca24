/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Transfer layer: mirror pool (§4.G), transfer scheduler (§4.I), metadata
//! flow (§4.J), and the package-download façade (§4.K), all built around the
//! per-repository [`Handle`] (§4.L).

pub mod handle;
pub mod metadata_flow;
pub mod mirror;
pub mod package;
pub mod scheduler;
pub mod target;

pub use handle::{Checks, Handle, HandleBuilder, IpResolve, RepoType, SignatureBackendKind};
pub use metadata_flow::{fetch_metadata, MetadataResult};
pub use mirror::{Mirror, MirrorHandle, MirrorPool, MirrorState};
pub use package::{download_packages, PackageTarget};
pub use scheduler::TransferScheduler;
pub use target::{Destination, DownloadTarget, FinishedTarget, ReturnCode, TransferState};
