/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Detached-signature verification (§4.F).
//!
//! Two interchangeable backends implement [`SignatureBackend`]: [`agent`]
//! manages a shared keyring directory the way an external OpenPGP agent
//! would, [`raw`] keeps one `<keyid>.pub` file per key. Both are built on
//! `sequoia-openpgp`; they differ only in how keys are stored and looked up
//! on disk, not in the cryptography itself.

pub mod agent;
pub mod raw;

use crate::error::LibrepoResult;
use std::path::Path;

/// Verification outcome for a detached signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    Ok,
    Bad,
}

/// One imported OpenPGP public key, as reported by `list_keys`.
#[derive(Debug, Clone)]
pub struct Key {
    pub key_id: String,
    pub user_ids: Vec<String>,
    pub subkeys: Vec<String>,
    pub raw: Option<Vec<u8>>,
}

/// Where key material comes from when importing.
pub enum KeySource<'a> {
    Bytes(&'a [u8]),
    Path(&'a Path),
}

/// Operations common to both signature-verification backends (§4.F).
pub trait SignatureBackend {
    /// Verify `sig` (detached signature bytes) over `data`, using keys found
    /// under `home_dir`. A backend-internal failure (bad homedir, I/O error)
    /// is an `Err`; a cryptographically-rejected signature is `Ok(Bad)`.
    fn check_detached_signature(
        &self,
        sig: &[u8],
        data: &[u8],
        home_dir: &Path,
    ) -> LibrepoResult<SignatureStatus>;

    /// Import a key into the backend's store under `home_dir`. Importing a
    /// key that is already present is not an error.
    fn import_key(&self, source: KeySource, home_dir: &Path) -> LibrepoResult<()>;

    /// List keys known under `home_dir`. When `export` is set, each key's
    /// `raw` field carries its serialized OpenPGP certificate.
    fn list_keys(&self, home_dir: &Path, export: bool) -> LibrepoResult<Vec<Key>>;
}
