// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Catalog Index (§4.7): indexes the digests embedded in a directory of
//! out-of-band `.cat` security catalogs, so a module's Authenticode digest
//! can be looked up even when the module carries no embedded signature of
//! its own.
//!
//! Like the Signature Extractor, this scans catalog files with the same
//! byte-pattern regex rather than parsing the catalog's own CMS structure —
//! a `.cat` file is itself a `SignedData` blob whose content is a sequence
//! of `CatalogInfo` digest entries, and the digest pattern is identical to
//! the one embedded in a PE's own certificate.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::pe::DigestAlgorithm;
use crate::signature::extractor::CERTIFICATE_REGEX;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog directory {0}: {1}")]
    DirUnreadable(PathBuf, std::io::Error),
}

const OID_MD5: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x02, 0x05];
const OID_SHA1: &[u8] = &[0x2b, 0x0e, 0x03, 0x02, 0x1a];
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];

/// One `(algorithm, digest)` entry pulled out of a catalog file, with the
/// digest bytes stored lowercase-hex for cheap, allocation-free set lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexedDigest {
    algorithm: DigestAlgorithm,
    hex_digest: String,
}

/// An in-memory index of every digest found across a directory of `.cat`
/// files. Built once per run (§4.7: "cache idempotence" — rebuilding the
/// index from the same directory yields the same entries).
#[derive(Debug, Default)]
pub struct CatalogIndex {
    digests: HashSet<IndexedDigest>,
    catalogs_scanned: usize,
}

impl CatalogIndex {
    /// Walks `catalog_dir` recursively, scanning every regular file for
    /// embedded digest patterns. Files that don't look like catalogs (no
    /// pattern match) are skipped silently; unreadable directories are an
    /// error.
    pub fn build(catalog_dir: &Path) -> Result<Self, CatalogError> {
        if !catalog_dir.exists() {
            return Err(CatalogError::DirUnreadable(
                catalog_dir.to_path_buf(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "catalog directory missing"),
            ));
        }

        let mut index = CatalogIndex::default();
        for entry in WalkDir::new(catalog_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let bytes = match fs::read(entry.path()) {
                Ok(b) => b,
                Err(_) => continue,
            };
            let found = index.scan_one(&bytes);
            if found > 0 {
                index.catalogs_scanned += 1;
            }
        }
        Ok(index)
    }

    fn scan_one(&mut self, bytes: &[u8]) -> usize {
        let mut found = 0;
        for caps in CERTIFICATE_REGEX.captures_iter(bytes) {
            let Some(oid) = caps.name("oid") else {
                continue;
            };
            let oid = oid.as_bytes();
            let algorithm = if oid == OID_MD5 {
                DigestAlgorithm::Md5
            } else if oid == OID_SHA1 {
                DigestAlgorithm::Sha1
            } else if oid == OID_SHA256 {
                DigestAlgorithm::Sha256
            } else {
                continue;
            };
            let Some(hash_size) = caps.name("hash_size").and_then(|m| m.as_bytes().first().copied())
            else {
                continue;
            };
            if hash_size as usize != algorithm.output_len() {
                continue;
            }
            let whole = caps.get(0).unwrap();
            let start = whole.end();
            let Some(digest) = bytes.get(start..start + hash_size as usize) else {
                continue;
            };
            self.digests.insert(IndexedDigest {
                algorithm,
                hex_digest: hex::encode(digest),
            });
            found += 1;
        }
        found
    }

    /// `true` if `digest` (raw bytes) under `algorithm` appears in any
    /// indexed catalog.
    pub fn contains(&self, algorithm: DigestAlgorithm, digest: &[u8]) -> bool {
        self.digests.contains(&IndexedDigest {
            algorithm,
            hex_digest: hex::encode(digest),
        })
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn catalogs_scanned(&self) -> usize {
        self.catalogs_scanned
    }
}
