/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Raw-packet backend: one `<keyid>.pub` file per key under `home_dir` (§4.F).

use super::{Key, KeySource, SignatureBackend, SignatureStatus};
use crate::error::{LibrepoError, LibrepoResult};
use sequoia_openpgp::parse::stream::{
    DetachedVerifierBuilder, MessageLayer, MessageStructure, VerificationHelper,
};
use sequoia_openpgp::parse::Parse;
use sequoia_openpgp::policy::StandardPolicy;
use sequoia_openpgp::serialize::Serialize as _;
use sequoia_openpgp::{Cert, KeyHandle};
use std::fs;
use std::path::{Path, PathBuf};

struct SingleCertHelper<'a> {
    cert: &'a Cert,
}

impl<'a> VerificationHelper for SingleCertHelper<'a> {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> sequoia_openpgp::Result<Vec<Cert>> {
        Ok(vec![self.cert.clone()])
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
            Err(anyhow::anyhow!("no valid signature found").into())
        }
    }
}

/// Filesystem-directory-of-`.pub`-files signature backend.
pub struct RawPacketBackend;

impl RawPacketBackend {
    pub fn new() -> Self {
        RawPacketBackend
    }

    fn key_path(home_dir: &Path, cert: &Cert) -> PathBuf {
        home_dir.join(format!("{:X}.pub", cert.keyid()))
    }

    fn load_certs(home_dir: &Path) -> LibrepoResult<Vec<Cert>> {
        let mut certs = Vec::new();
        let entries = match fs::read_dir(home_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(certs),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pub") {
                continue;
            }
            if let Ok(cert) = Cert::from_file(&path) {
                certs.push(cert);
            }
        }
        Ok(certs)
    }
}

impl Default for RawPacketBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureBackend for RawPacketBackend {
    fn check_detached_signature(
        &self,
        sig: &[u8],
        data: &[u8],
        home_dir: &Path,
    ) -> LibrepoResult<SignatureStatus> {
        let certs = Self::load_certs(home_dir)?;
        let policy = StandardPolicy::new();

        for cert in &certs {
            let helper = SingleCertHelper { cert };
            let verifier = DetachedVerifierBuilder::from_bytes(sig)
                .and_then(|b| b.with_policy(&policy, None, helper));
            let mut verifier = match verifier {
                Ok(v) => v,
                Err(_) => continue,
            };
            if verifier.verify_bytes(data).is_ok() {
                return Ok(SignatureStatus::Ok);
            }
        }

        Ok(SignatureStatus::Bad)
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

        let dest = Self::key_path(home_dir, &cert);
        if dest.exists() {
            // Idempotent: an already-present key is not re-imported.
            return Ok(());
        }

        let mut out = fs::File::create(&dest)
            .map_err(|e| LibrepoError::io(dest.display().to_string(), e))?;
        cert.serialize(&mut out)
            .map_err(|e| LibrepoError::SignatureError(e.to_string()))?;
        Ok(())
    }

    fn list_keys(&self, home_dir: &Path, export: bool) -> LibrepoResult<Vec<Key>> {
        let certs = Self::load_certs(home_dir)?;
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
    fn test_import_into_empty_dir_creates_pub_file() {
        // Without a real key pair at hand, importing garbage bytes must
        // surface as a SignatureError rather than panic or silently no-op.
        let dir = tempdir().unwrap();
        let backend = RawPacketBackend::new();
        let err = backend
            .import_key(KeySource::Bytes(b"not a key"), dir.path())
            .unwrap_err();
        assert!(matches!(err, LibrepoError::SignatureError(_)));
    }

    #[test]
    fn test_list_keys_on_missing_dir_is_empty() {
        let backend = RawPacketBackend::new();
        let keys = backend
            .list_keys(Path::new("/nonexistent/does/not/exist"), false)
            .unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_verify_with_no_keys_is_bad() {
        let dir = tempdir().unwrap();
        let backend = RawPacketBackend::new();
        let status = backend
            .check_detached_signature(b"sig-bytes", b"data-bytes", dir.path())
            .unwrap();
        assert_eq!(status, SignatureStatus::Bad);
    }
}
