/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Agent-backed backend: keys live in a single shared keyring file under a
//! per-user socket directory, the way an external OpenPGP agent would
//! organize its homedir (§4.F).
//!
//! SELinux label save/restore around the socket-directory `mkdir` is not
//! implemented — this build carries no `libselinux` binding, so the context
//! steps from the original design are skipped. Directory creation failure
//! is still only ever logged, never fatal, matching the source behavior for
//! callers without SELinux enabled.

use super::{Key, KeySource, SignatureBackend, SignatureStatus};
use crate::error::{LibrepoError, LibrepoResult};
use crate::logging::{debug, warn};
use sequoia_openpgp::cert::CertParser;
use sequoia_openpgp::parse::stream::{
    DetachedVerifierBuilder, MessageLayer, MessageStructure, VerificationHelper,
};
use sequoia_openpgp::parse::Parse;
use sequoia_openpgp::policy::StandardPolicy;
use sequoia_openpgp::serialize::Serialize as _;
use sequoia_openpgp::{Cert, KeyHandle};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const KEYRING_FILE: &str = "pubring.pgp";

struct KeyringHelper {
    certs: Vec<Cert>,
}

impl VerificationHelper for KeyringHelper {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> sequoia_openpgp::Result<Vec<Cert>> {
        Ok(self.certs.clone())
    }

    fn check(&mut self, structure: MessageStructure) -> sequoia_openpgp::Result<()> {
        let mut good = false;
        for layer in structure.into_iter() {
            if let MessageLayer::SignatureGroup { results } = layer {
                for result in results {
                    if result.is_ok() {
                        good = true;
                    }
                }
            }
        }
        if good {
            Ok(())
        } else {
            Err(anyhow::anyhow!("no valid signature found in keyring").into())
        }
    }
}

/// Keyring-directory-oriented signature backend.
pub struct AgentBackend;

impl AgentBackend {
    pub fn new() -> Self {
        AgentBackend
    }

    fn keyring_path(home_dir: &Path) -> PathBuf {
        home_dir.join(KEYRING_FILE)
    }

    fn load_keyring(home_dir: &Path) -> LibrepoResult<Vec<Cert>> {
        let path = Self::keyring_path(home_dir);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let parser = CertParser::from_file(&path)
            .map_err(|e| LibrepoError::SignatureError(e.to_string()))?;
        let certs = parser
            .filter_map(|c| c.ok())
            .collect::<Vec<_>>();
        Ok(certs)
    }

    /// Ensure a mode-0700 per-user socket directory exists at `socket_dir`.
    /// Mirrors the agent's pre-flight step; failure is logged, never fatal.
    pub fn ensure_socket_dir(socket_dir: &Path) {
        if let Err(e) = fs::create_dir_all(socket_dir) {
            warn!("could not create agent socket directory {socket_dir:?}: {e}");
            return;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(socket_dir, fs::Permissions::from_mode(0o700)) {
                warn!("could not chmod agent socket directory {socket_dir:?}: {e}");
            }
        }

        debug!("agent socket directory ready at {socket_dir:?}");
    }
}

impl Default for AgentBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureBackend for AgentBackend {
    fn check_detached_signature(
        &self,
        sig: &[u8],
        data: &[u8],
        home_dir: &Path,
    ) -> LibrepoResult<SignatureStatus> {
        let certs = Self::load_keyring(home_dir)?;
        if certs.is_empty() {
            return Ok(SignatureStatus::Bad);
        }

        let policy = StandardPolicy::new();
        let helper = KeyringHelper { certs };
        let verifier = DetachedVerifierBuilder::from_bytes(sig)
            .and_then(|b| b.with_policy(&policy, None, helper));

        match verifier {
            Ok(mut v) => match v.verify_bytes(data) {
                Ok(()) => Ok(SignatureStatus::Ok),
                Err(_) => Ok(SignatureStatus::Bad),
            },
            Err(e) => Err(LibrepoError::SignatureError(e.to_string())),
        }
    }

    fn import_key(&self, source: KeySource, home_dir: &Path) -> LibrepoResult<()> {
        fs::create_dir_all(home_dir)
            .map_err(|e| LibrepoError::io(home_dir.display().to_string(), e))?;

        let cert = match source {
            KeySource::Bytes(bytes) => Cert::from_bytes(bytes)
                .map_err(|e| LibrepoError::SignatureError(e.to_string()))?,
            KeySource::Path(path) => {
                Cert::from_file(path).map_err(|e| LibrepoError::SignatureError(e.to_string()))?
            }
        };

        let existing = Self::load_keyring(home_dir)?;
        if existing.iter().any(|c| c.fingerprint() == cert.fingerprint()) {
            return Ok(());
        }

        let path = Self::keyring_path(home_dir);
        let mut out = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LibrepoError::io(path.display().to_string(), e))?;
        let mut buf = Vec::new();
        cert.serialize(&mut buf)
            .map_err(|e| LibrepoError::SignatureError(e.to_string()))?;
        out.write_all(&buf)
            .map_err(|e| LibrepoError::io(path.display().to_string(), e))?;
        Ok(())
    }

    fn list_keys(&self, home_dir: &Path, export: bool) -> LibrepoResult<Vec<Key>> {
        let certs = Self::load_keyring(home_dir)?;
        let mut keys = Vec::with_capacity(certs.len());

        for cert in certs {
            let user_ids = cert
                .userids()
                .map(|ua| String::from_utf8_lossy(ua.userid().value()).to_string())
                .collect();
            let subkeys = cert
                .keys()
                .subkeys()
                .map(|ka| format!("{:X}", ka.key().keyid()))
                .collect();
            let raw = if export {
                let mut buf = Vec::new();
                cert.serialize(&mut buf)
                    .map_err(|e| LibrepoError::SignatureError(e.to_string()))?;
                Some(buf)
            } else {
                None
            };

            keys.push(Key {
                key_id: format!("{:X}", cert.keyid()),
                user_ids,
                subkeys,
                raw,
            });
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_verify_against_empty_keyring_is_bad() {
        let dir = tempdir().unwrap();
        let backend = AgentBackend::new();
        let status = backend
            .check_detached_signature(b"sig", b"data", dir.path())
            .unwrap();
        assert_eq!(status, SignatureStatus::Bad);
    }

    #[test]
    fn test_list_keys_on_missing_keyring_is_empty() {
        let dir = tempdir().unwrap();
        let backend = AgentBackend::new();
        let keys = backend.list_keys(dir.path(), false).unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_ensure_socket_dir_creates_with_mode_0700() {
        let dir = tempdir().unwrap();
        let socket_dir = dir.path().join("agent-socket");
        AgentBackend::ensure_socket_dir(&socket_dir);
        assert!(socket_dir.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&socket_dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
