/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Streaming `repomd.xml` parser (§4.D).

use crate::error::{LibrepoError, LibrepoResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashMap;

/// One `<data type="...">` record from `repomd.xml`.
#[derive(Debug, Clone, Default)]
pub struct RepomdRecord {
    pub record_type: String,
    pub location_href: String,
    pub location_base: Option<String>,
    pub checksum: (String, String),
    pub open_checksum: Option<(String, String)>,
    pub timestamp: i64,
    pub size: i64,
    pub open_size: i64,
    pub header_checksum: Option<(String, String)>,
    pub header_size: Option<i64>,
    pub database_version: Option<i32>,
}

/// A distro tag: `<tag cpeid="...">value</tag>`.
#[derive(Debug, Clone)]
pub struct DistroTag {
    pub cpeid: Option<String>,
    pub value: String,
}

/// A fully parsed `repomd.xml`.
#[derive(Debug, Clone, Default)]
pub struct Repomd {
    pub revision: String,
    pub repo_tags: Vec<String>,
    pub content_tags: Vec<String>,
    pub distro_tags: Vec<DistroTag>,
    records: HashMap<String, RepomdRecord>,
}

impl Repomd {
    /// Look up a record by `type`, constant-ish time.
    pub fn record(&self, record_type: &str) -> Option<&RepomdRecord> {
        self.records.get(record_type)
    }

    pub fn records(&self) -> impl Iterator<Item = &RepomdRecord> {
        self.records.values()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

fn attr(tag: &BytesStart, key: &str) -> Option<String> {
    tag.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    Root,
    Tags,
    TagsRepo,
    TagsContent,
    TagsDistro,
    Data,
    DataLocation,
    DataChecksum,
    DataOpenChecksum,
    DataTimestamp,
    DataSize,
    DataOpenSize,
    DataHeaderChecksum,
    DataHeaderSize,
    DataDbVersion,
    Other,
}

/// Stream-parse `repomd.xml`. Later `<data type="T">` elements overwrite
/// earlier records with the same `type`, per §4.D.
pub fn parse(xml: &str) -> LibrepoResult<Repomd> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut repomd = Repomd::default();
    let mut stack: Vec<Path> = Vec::new();
    let mut current: Option<RepomdRecord> = None;
    let mut current_checksum_type: Option<String> = None;
    let mut current_distro_cpeid: Option<String> = None;

    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| LibrepoError::RepomdXml(e.to_string()))?
        {
            Event::Eof => break,
            Event::Start(tag) | Event::Empty(tag) => {
                let name = local_name(&tag);
                let path = match (stack.last().copied(), name.as_str()) {
                    (_, "repomd") => Path::Root,
                    (_, "tags") => Path::Tags,
                    (Some(Path::Tags), "repo") => Path::TagsRepo,
                    (Some(Path::Tags), "content") => Path::TagsContent,
                    (Some(Path::Tags), "distro") => {
                        current_distro_cpeid = attr(&tag, "cpeid");
                        Path::TagsDistro
                    }
                    (_, "data") => {
                        current = Some(RepomdRecord {
                            record_type: attr(&tag, "type").unwrap_or_default(),
                            ..Default::default()
                        });
                        Path::Data
                    }
                    (Some(Path::Data), "location") => {
                        if let Some(rec) = current.as_mut() {
                            rec.location_href = attr(&tag, "href").unwrap_or_default();
                            rec.location_base = attr(&tag, "base");
                        }
                        Path::DataLocation
                    }
                    (Some(Path::Data), "checksum") => {
                        current_checksum_type = attr(&tag, "type");
                        Path::DataChecksum
                    }
                    (Some(Path::Data), "open-checksum") => {
                        current_checksum_type = attr(&tag, "type");
                        Path::DataOpenChecksum
                    }
                    (Some(Path::Data), "header-checksum") => {
                        current_checksum_type = attr(&tag, "type");
                        Path::DataHeaderChecksum
                    }
                    (Some(Path::Data), "timestamp") => Path::DataTimestamp,
                    (Some(Path::Data), "size") => Path::DataSize,
                    (Some(Path::Data), "open-size") => Path::DataOpenSize,
                    (Some(Path::Data), "header-size") => Path::DataHeaderSize,
                    (Some(Path::Data), "database_version") => Path::DataDbVersion,
                    _ => Path::Other,
                };
                stack.push(path);
            }
            Event::End(tag) => {
                let name = local_name(&tag);
                stack.pop();
                if name == "data" {
                    if let Some(rec) = current.take() {
                        if !rec.record_type.is_empty() {
                            repomd.records.insert(rec.record_type.clone(), rec);
                        }
                    }
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| LibrepoError::RepomdXml(e.to_string()))?
                    .to_string();
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }

                match stack.last() {
                    Some(Path::TagsRepo) => repomd.repo_tags.push(text.to_string()),
                    Some(Path::TagsContent) => repomd.content_tags.push(text.to_string()),
                    Some(Path::TagsDistro) => {
                        repomd.distro_tags.push(DistroTag {
                            cpeid: current_distro_cpeid.take(),
                            value: text.to_string(),
                        });
                    }
                    Some(Path::DataLocation) => {}
                    Some(Path::DataChecksum) => {
                        if let (Some(rec), Some(ty)) = (current.as_mut(), current_checksum_type.take()) {
                            rec.checksum = (ty, text.to_string());
                        }
                    }
                    Some(Path::DataOpenChecksum) => {
                        if let (Some(rec), Some(ty)) = (current.as_mut(), current_checksum_type.take()) {
                            rec.open_checksum = Some((ty, text.to_string()));
                        }
                    }
                    Some(Path::DataHeaderChecksum) => {
                        if let (Some(rec), Some(ty)) = (current.as_mut(), current_checksum_type.take()) {
                            rec.header_checksum = Some((ty, text.to_string()));
                        }
                    }
                    Some(Path::DataTimestamp) => {
                        if let Some(rec) = current.as_mut() {
                            rec.timestamp = text.parse().unwrap_or(0);
                        }
                    }
                    Some(Path::DataSize) => {
                        if let Some(rec) = current.as_mut() {
                            rec.size = text.parse().unwrap_or(0);
                        }
                    }
                    Some(Path::DataOpenSize) => {
                        if let Some(rec) = current.as_mut() {
                            rec.open_size = text.parse().unwrap_or(0);
                        }
                    }
                    Some(Path::DataHeaderSize) => {
                        if let Some(rec) = current.as_mut() {
                            rec.header_size = text.parse().ok();
                        }
                    }
                    Some(Path::DataDbVersion) => {
                        if let Some(rec) = current.as_mut() {
                            rec.database_version = text.parse().ok();
                        }
                    }
                    _ if stack.len() == 2 && matches!(stack.first(), Some(Path::Root)) => {
                        // <repomd><revision>...</revision></repomd>
                        repomd.revision = text.to_string();
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(repomd)
}

fn local_name(tag: &BytesStart) -> String {
    String::from_utf8_lossy(tag.local_name().as_ref()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <revision>1700000000</revision>
  <tags>
    <repo>Fedora</repo>
    <distro cpeid="cpe:/o:fedoraproject:fedora">Fedora 40</distro>
  </tags>
  <data type="primary">
    <checksum type="sha256">abc123</checksum>
    <open-checksum type="sha256">def456</open-checksum>
    <location href="repodata/primary.xml.gz"/>
    <timestamp>1700000001</timestamp>
    <size>1000</size>
    <open-size>5000</open-size>
  </data>
  <data type="filelists">
    <checksum type="sha256">fff000</checksum>
    <location href="repodata/filelists.xml.gz"/>
    <timestamp>1700000002</timestamp>
    <size>2000</size>
    <open-size>8000</open-size>
  </data>
  <data type="primary">
    <checksum type="sha256">newer111</checksum>
    <location href="repodata/primary-v2.xml.gz"/>
    <timestamp>1700000003</timestamp>
    <size>1100</size>
    <open-size>5500</open-size>
  </data>
</repomd>"#;

    #[test]
    fn test_parses_revision_and_tags() {
        let repomd = parse(SAMPLE).unwrap();
        assert_eq!(repomd.revision, "1700000000");
        assert_eq!(repomd.distro_tags.len(), 1);
        assert_eq!(repomd.distro_tags[0].value, "Fedora 40");
    }

    #[test]
    fn test_duplicate_type_overwrites() {
        let repomd = parse(SAMPLE).unwrap();
        assert_eq!(repomd.record_count(), 2);
        let primary = repomd.record("primary").unwrap();
        assert_eq!(primary.location_href, "repodata/primary-v2.xml.gz");
        assert_eq!(primary.checksum, ("sha256".to_string(), "newer111".to_string()));
    }

    #[test]
    fn test_lookup_by_type() {
        let repomd = parse(SAMPLE).unwrap();
        assert!(repomd.record("filelists").is_some());
        assert!(repomd.record("other_sqlite").is_none());
    }
}
