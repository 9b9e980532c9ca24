/*
 * librepo-rs - client library for fetching RPM-style package repositories.
 * Copyright (C) 2025  librepo-rs contributors
 *
 * This library is free software; you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published
 * by the Free Software Foundation; either version 2.1 of the License, or
 * (at your option) any later version.
 */

//! Streaming metalink XML parser (§4.C).
//!
//! A small recursive state machine built on `quick_xml`'s pull-event reader:
//! it accumulates character data only for the elements it needs and skips
//! everything else by depth, without building a DOM.

use crate::error::{LibrepoError, LibrepoResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// One mirror entry inside a metalink `<file>`.
#[derive(Debug, Clone, Default)]
pub struct MetalinkUrl {
    pub protocol: Option<String>,
    pub url_type: Option<String>,
    pub location: Option<String>,
    pub preference: i32,
    pub url: String,
}

/// A parsed metalink document, filtered down to the single requested file.
#[derive(Debug, Clone, Default)]
pub struct Metalink {
    pub filename: String,
    pub timestamp: i64,
    pub size: i64,
    pub hashes: Vec<(String, String)>,
    pub urls: Vec<MetalinkUrl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Elem {
    Metalink,
    Files,
    File,
    Size,
    Timestamp,
    Verification,
    Hash,
    Resources,
    Url,
    Other,
}

fn classify(name: &str) -> Elem {
    match name {
        "metalink" => Elem::Metalink,
        "files" => Elem::Files,
        "file" => Elem::File,
        "size" => Elem::Size,
        "timestamp" => Elem::Timestamp,
        "verification" => Elem::Verification,
        "hash" => Elem::Hash,
        "resources" => Elem::Resources,
        "url" => Elem::Url,
        _ => Elem::Other,
    }
}

fn attr_value(tag: &BytesStart, key: &str) -> Option<String> {
    tag.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == key.as_bytes() {
            Some(String::from_utf8_lossy(&a.value).to_string())
        } else {
            None
        }
    })
}

/// Stream-parse `xml`, filtering on the `<file name="target_filename">`
/// element. Accepts the first matching `file`; all others are skipped. An
/// absent match is a "bad metalink" error, per §4.C.
pub fn parse(xml: &str, target_filename: &str) -> LibrepoResult<Metalink> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Elem> = Vec::new();
    let mut result: Option<Metalink> = None;
    let mut in_target_file = false;
    let mut skip_until_depth: Option<usize> = None;
    let mut pending_hash_type: Option<String> = None;
    let mut pending_url = MetalinkUrl::default();

    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| LibrepoError::MetalinkXml(e.to_string()))?
        {
            Event::Eof => break,
            Event::Start(tag) => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).to_string();
                let elem = classify(&name);

                if let Some(skip_depth) = skip_until_depth {
                    stack.push(elem);
                    if stack.len() > skip_depth {
                        continue;
                    }
                }

                match elem {
                    Elem::File => {
                        let file_name = attr_value(&tag, "name").unwrap_or_default();
                        if result.is_none() && file_name == target_filename {
                            in_target_file = true;
                            result = Some(Metalink {
                                filename: file_name,
                                ..Default::default()
                            });
                        } else if !in_target_file {
                            // A non-matching file (or a second file after we
                            // already found our match): skip its subtree.
                            skip_until_depth = Some(stack.len());
                        }
                    }
                    Elem::Hash if in_target_file => {
                        pending_hash_type = attr_value(&tag, "type");
                    }
                    Elem::Url if in_target_file => {
                        pending_url = MetalinkUrl {
                            protocol: attr_value(&tag, "protocol"),
                            url_type: attr_value(&tag, "type"),
                            location: attr_value(&tag, "location"),
                            preference: attr_value(&tag, "preference")
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0),
                            url: String::new(),
                        };
                    }
                    _ => {}
                }

                stack.push(elem);
            }
            Event::End(tag) => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).to_string();
                let elem = classify(&name);
                stack.pop();

                if let Some(skip_depth) = skip_until_depth {
                    if stack.len() <= skip_depth {
                        skip_until_depth = None;
                    }
                    continue;
                }

                match elem {
                    Elem::File if in_target_file => {
                        in_target_file = false;
                    }
                    Elem::Url if in_target_file => {
                        if let Some(m) = result.as_mut() {
                            m.urls.push(std::mem::take(&mut pending_url));
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(tag) => {
                // Self-closing tag (`<size/>`): run start+end handling back
                // to back since quick_xml never emits a paired End for it.
                let name = String::from_utf8_lossy(tag.name().as_ref()).to_string();
                let elem = classify(&name);

                if skip_until_depth.is_some() {
                    continue;
                }

                match elem {
                    Elem::File => {
                        let file_name = attr_value(&tag, "name").unwrap_or_default();
                        if result.is_none() && file_name == target_filename && !in_target_file {
                            result = Some(Metalink {
                                filename: file_name,
                                ..Default::default()
                            });
                        }
                    }
                    Elem::Url if in_target_file => {
                        let url = MetalinkUrl {
                            protocol: attr_value(&tag, "protocol"),
                            url_type: attr_value(&tag, "type"),
                            location: attr_value(&tag, "location"),
                            preference: attr_value(&tag, "preference")
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0),
                            url: String::new(),
                        };
                        if let Some(m) = result.as_mut() {
                            m.urls.push(url);
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(text) => {
                if skip_until_depth.is_some() || !in_target_file {
                    continue;
                }
                let text = text
                    .unescape()
                    .map_err(|e| LibrepoError::MetalinkXml(e.to_string()))?
                    .to_string();
                if text.trim().is_empty() {
                    continue;
                }

                match stack.last() {
                    Some(Elem::Size) => {
                        if let Some(m) = result.as_mut() {
                            m.size = text.trim().parse().unwrap_or(0);
                        }
                    }
                    Some(Elem::Timestamp) => {
                        if let Some(m) = result.as_mut() {
                            m.timestamp = text.trim().parse().unwrap_or(0);
                        }
                    }
                    Some(Elem::Hash) => {
                        if let Some(m) = result.as_mut() {
                            if let Some(ty) = pending_hash_type.take() {
                                m.hashes.push((ty, text.trim().to_string()));
                            }
                        }
                    }
                    Some(Elem::Url) => {
                        pending_url.url.push_str(text.trim());
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    result.ok_or_else(|| LibrepoError::MetalinkBad(target_filename.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<metalink version="3.0" xmlns="http://www.metalinker.org/">
  <files>
    <file name="other.xml">
      <size>5</size>
    </file>
    <file name="repomd.xml">
      <size>1234</size>
      <timestamp>1700000000</timestamp>
      <verification>
        <hash type="sha256">deadbeef</hash>
        <hash type="sha1">cafef00d</hash>
      </verification>
      <resources>
        <url protocol="http" type="http" location="us" preference="100">http://mirror1.example/repomd.xml</url>
        <url protocol="http" type="http" location="de" preference="90">http://mirror2.example/repomd.xml</url>
      </resources>
    </file>
  </files>
</metalink>"#;

    #[test]
    fn test_parses_target_file_only() {
        let ml = parse(SAMPLE, "repomd.xml").unwrap();
        assert_eq!(ml.filename, "repomd.xml");
        assert_eq!(ml.size, 1234);
        assert_eq!(ml.timestamp, 1700000000);
        assert_eq!(ml.hashes.len(), 2);
        assert_eq!(ml.hashes[0], ("sha256".to_string(), "deadbeef".to_string()));
        assert_eq!(ml.urls.len(), 2);
        assert_eq!(ml.urls[0].preference, 100);
        assert_eq!(ml.urls[0].url, "http://mirror1.example/repomd.xml");
    }

    #[test]
    fn test_missing_file_is_metalink_bad() {
        let err = parse(SAMPLE, "filelists.xml.gz").unwrap_err();
        assert!(matches!(err, LibrepoError::MetalinkBad(_)));
    }
}
