/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Per-repository configuration consumed by the scheduler (§3 `Handle`, §4.L).

use crate::urlvars::UrlVars;
use bitflags::bitflags;
use std::path::PathBuf;
use std::time::Duration;

bitflags! {
    /// `Handle.checks` bitset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Checks: u8 {
        const VERIFY_CHECKSUMS = 0b01;
        const VERIFY_SIGNATURE = 0b10;
    }
}

/// Reserved enum point for future repository formats (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepoType {
    #[default]
    Rpm,
}

/// Preferred IP family when resolving mirror hostnames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpResolve {
    #[default]
    Whatever,
    V4,
    V6,
}

/// Which of the two interchangeable signature-verification strategies (§4.F)
/// a `Handle` is configured to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureBackendKind {
    #[default]
    RawPacket,
    Agent,
}

#[derive(Debug, Clone, Default)]
pub struct ProxySettings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HttpAuth {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub ca_path: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

/// Per-repository configuration (§3 `Handle`). Construction happens through
/// [`HandleBuilder`]; once built, every field here is read-only for the
/// duration of a scheduler call — mutating a `Handle` mid-call is a misuse
/// the type system does not need to prevent because the scheduler only ever
/// borrows `&Handle`.
#[derive(Debug, Clone)]
pub struct Handle {
    pub urls: Vec<String>,
    pub mirrorlist_url: Option<String>,
    pub metalink_url: Option<String>,
    pub destination_dir: PathBuf,
    pub repo_type: RepoType,
    pub checks: Checks,
    pub data_file_allowlist: Vec<String>,
    pub data_file_blocklist: Vec<String>,
    pub update_mode: bool,
    pub local_only: bool,
    pub max_parallel_connections: usize,
    /// `-1` disables the per-host cap.
    pub max_connections_per_host: i64,
    /// `<= 0` means "try every mirror".
    pub max_mirror_retries: i64,
    /// 0 = unlimited.
    pub max_speed: u64,
    pub resume_downloads: bool,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub proxy: ProxySettings,
    pub http_auth: HttpAuth,
    pub tls: TlsOptions,
    pub ip_resolve: IpResolve,
    pub url_substitution_vars: UrlVars,
    pub fastest_mirror_cache_path: Option<PathBuf>,
    pub fastest_mirror_cache_ttl: Duration,
    pub interruptible: bool,
    /// Which signature backend (§4.F) the metadata flow should use when
    /// `checks` includes `VERIFY_SIGNATURE`.
    pub signature_backend: SignatureBackendKind,
    /// Keyring/homedir the signature backend reads from. Defaults to
    /// `destination_dir/.gpg-home` when unset.
    pub signature_home_dir: Option<PathBuf>,
}

impl Default for Handle {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            mirrorlist_url: None,
            metalink_url: None,
            destination_dir: PathBuf::from("."),
            repo_type: RepoType::default(),
            checks: Checks::empty(),
            data_file_allowlist: Vec::new(),
            data_file_blocklist: Vec::new(),
            update_mode: false,
            local_only: false,
            max_parallel_connections: 4,
            max_connections_per_host: 2,
            max_mirror_retries: 0,
            max_speed: 0,
            resume_downloads: true,
            connect_timeout: Duration::from_secs(30),
            user_agent: concat!("librepo-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: ProxySettings::default(),
            http_auth: HttpAuth::default(),
            tls: TlsOptions::default(),
            ip_resolve: IpResolve::default(),
            url_substitution_vars: UrlVars::new(),
            fastest_mirror_cache_path: None,
            fastest_mirror_cache_ttl: Duration::from_secs(6 * 60 * 60),
            interruptible: false,
            signature_backend: SignatureBackendKind::default(),
            signature_home_dir: None,
        }
    }
}

impl Handle {
    pub fn builder() -> HandleBuilder {
        HandleBuilder::default()
    }

    /// A data-file type passes the configured filters: allowlist, when
    /// non-empty, is the *only* set admitted; blocklist entries are always
    /// excluded.
    pub fn record_type_allowed(&self, record_type: &str) -> bool {
        if !self.data_file_allowlist.is_empty()
            && !self.data_file_allowlist.iter().any(|t| t == record_type)
        {
            return false;
        }
        !self.data_file_blocklist.iter().any(|t| t == record_type)
    }

    /// Resolve the effective keyring directory for the signature backend
    /// (§4.J step 6): the explicit override, or `destination_dir/.gpg-home`.
    pub fn signature_home_dir(&self) -> PathBuf {
        self.signature_home_dir
            .clone()
            .unwrap_or_else(|| self.destination_dir.join(".gpg-home"))
    }
}

/// Typed builder replacing the reference implementation's variable-argument
/// option setter (§9 "Replacing C idioms"): each option gets its own typed
/// method instead of a `(name, ...)` pair checked at runtime.
#[derive(Debug, Clone, Default)]
pub struct HandleBuilder {
    handle: Handle,
}

macro_rules! setter {
    ($name:ident: $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.handle.$name = value;
            self
        }
    };
}

impl HandleBuilder {
    pub fn urls(mut self, urls: Vec<String>) -> Self {
        self.handle.urls = urls;
        self
    }

    pub fn mirrorlist_url(mut self, url: impl Into<String>) -> Self {
        self.handle.mirrorlist_url = Some(url.into());
        self
    }

    pub fn metalink_url(mut self, url: impl Into<String>) -> Self {
        self.handle.metalink_url = Some(url.into());
        self
    }

    setter!(destination_dir: PathBuf);
    setter!(repo_type: RepoType);
    setter!(checks: Checks);
    setter!(data_file_allowlist: Vec<String>);
    setter!(data_file_blocklist: Vec<String>);
    setter!(update_mode: bool);
    setter!(local_only: bool);
    setter!(max_parallel_connections: usize);
    setter!(max_connections_per_host: i64);
    setter!(max_mirror_retries: i64);
    setter!(max_speed: u64);
    setter!(resume_downloads: bool);
    setter!(connect_timeout: Duration);
    setter!(user_agent: String);
    setter!(proxy: ProxySettings);
    setter!(http_auth: HttpAuth);
    setter!(tls: TlsOptions);
    setter!(ip_resolve: IpResolve);
    setter!(url_substitution_vars: UrlVars);
    setter!(fastest_mirror_cache_ttl: Duration);
    setter!(interruptible: bool);
    setter!(signature_backend: SignatureBackendKind);

    pub fn fastest_mirror_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.handle.fastest_mirror_cache_path = Some(path.into());
        self
    }

    pub fn signature_home_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.handle.signature_home_dir = Some(path.into());
        self
    }

    pub fn build(self) -> Handle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec_recommendations() {
        let handle = Handle::default();
        assert_eq!(handle.max_parallel_connections, 4);
        assert_eq!(handle.max_connections_per_host, 2);
        assert_eq!(handle.max_mirror_retries, 0);
    }

    #[test]
    fn test_allowlist_restricts_blocklist_excludes() {
        let handle = Handle::builder()
            .data_file_allowlist(vec!["primary".to_string(), "filelists".to_string()])
            .data_file_blocklist(vec!["filelists".to_string()])
            .build();

        assert!(handle.record_type_allowed("primary"));
        assert!(!handle.record_type_allowed("filelists"));
        assert!(!handle.record_type_allowed("other_sqlite"));
    }

    #[test]
    fn test_empty_allowlist_admits_everything_not_blocked() {
        let handle = Handle::builder()
            .data_file_blocklist(vec!["comps".to_string()])
            .build();
        assert!(handle.record_type_allowed("primary"));
        assert!(!handle.record_type_allowed("comps"));
    }
}
