// SPDX-License-Identifier: MIT OR Apache-2.0
//! The data model shared by every component (§3).

use std::collections::HashMap;

use crate::verdict::ModuleVerdict;

/// One contiguous run of memory-resident PE bytes.
///
/// `mem_offset` is masked to 32 bits before use — upstream dump tooling is
/// known to emit spurious high bits (e.g. `0x20002790a000` instead of
/// `0x2790a000`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct PageSpan {
    pub mem_offset: u64,
    pub file_offset: u64,
    pub byte_count: u32,
}

impl PageSpan {
    /// `mem_offset`, masked to the low 32 bits.
    pub fn masked_mem_offset(&self) -> u64 {
        self.mem_offset & 0xffff_ffff
    }
}

/// The Windows kernel section-object kind backing a file's memory residency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum SectionKind {
    ImageSectionObject,
    DataSectionObject,
    SharedCacheMap,
}

/// Output of the `PageProvider` for one file object (§3).
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct SectionSnapshot {
    /// Full device path, e.g. `\Device\HarddiskVolume2\Windows\System32\notepad.exe`.
    pub name: String,
    pub kind: SectionKind,
    pub present: Vec<PageSpan>,
    /// True iff any expected page is missing from `present`.
    pub padded: bool,
}

impl SectionSnapshot {
    /// `SharedCacheMap` carries no reliable page layout; the spec treats it
    /// as unusable regardless of residency.
    pub fn is_usable(&self) -> bool {
        self.kind != SectionKind::SharedCacheMap
    }

    /// True iff the section is fully memory resident (no holes, no pad).
    pub fn is_complete(&self) -> bool {
        self.is_usable() && !self.padded
    }
}

/// A reconstructed on-disk PE byte buffer, assembled from a sparse page list.
#[derive(Debug, Clone)]
pub struct ReconstructedPe {
    pub bytes: Vec<u8>,
    /// True iff assembly had no holes and no failed reads.
    pub is_complete: bool,
}

/// One loaded executable module: a process image/DLL, or a driver.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Module {
    pub full_path: String,
    pub base_name: String,
    /// Process identifier, or 0 for kernel drivers.
    pub owner_id: u64,
}

/// `file extension -> ordered candidate image bases`, scoped to a profile tag.
///
/// Consulted only when a reconstructed `ImageSectionObject` fails its PE
/// checksum and needs derelocation (§4.4).
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct FrequentBaseTable {
    pub(crate) by_extension: HashMap<String, Vec<u64>>,
}

impl FrequentBaseTable {
    pub fn new(by_extension: HashMap<String, Vec<u64>>) -> Self {
        Self { by_extension }
    }

    /// Candidate bases for the given file extension (`"exe"`, `"dll"`, `"sys"`),
    /// lower-cased match, empty if the extension has no recorded candidates.
    pub fn candidates(&self, extension: &str) -> &[u64] {
        self.by_extension
            .get(&extension.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Memoizes the final verdict for a normalized module path so that a module
/// loaded by several processes (or re-encountered while enumerating) is
/// verified exactly once (§3 lifecycle, §8 invariant 4).
#[derive(Debug, Default)]
pub struct AnalysisCache {
    seen: HashMap<String, ModuleVerdict>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, full_path: &str) -> Option<ModuleVerdict> {
        self.seen.get(&normalize_cache_key(full_path)).cloned()
    }

    pub fn insert(&mut self, full_path: &str, result: impl Into<ModuleVerdict>) {
        self.seen.insert(normalize_cache_key(full_path), result.into());
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

fn normalize_cache_key(full_path: &str) -> String {
    full_path.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_span_masks_spurious_high_bits() {
        let span = PageSpan {
            mem_offset: 0x2000_2790_a000,
            file_offset: 0,
            byte_count: 0x1000,
        };
        assert_eq!(span.masked_mem_offset(), 0x2790_a000);
    }

    #[test]
    fn shared_cache_map_is_never_usable() {
        let snap = SectionSnapshot {
            name: r"\Device\HarddiskVolume2\x".into(),
            kind: SectionKind::SharedCacheMap,
            present: vec![],
            padded: false,
        };
        assert!(!snap.is_usable());
        assert!(!snap.is_complete());
    }

    #[test]
    fn cache_is_case_insensitive_on_path() {
        use crate::returncode::ReturnCode;

        let mut cache = AnalysisCache::new();
        cache.insert(r"\Device\HarddiskVolume2\Windows\x.exe", ReturnCode::NotSigned);
        assert_eq!(
            cache.get(r"\DEVICE\HARDDISKVOLUME2\WINDOWS\X.EXE"),
            Some(ModuleVerdict::Code(ReturnCode::NotSigned))
        );
    }

    #[test]
    fn frequent_base_table_extension_lookup_is_case_insensitive() {
        let mut map = HashMap::new();
        map.insert("dll".to_string(), vec![0x1_8000_0000]);
        let table = FrequentBaseTable::new(map);
        assert_eq!(table.candidates("DLL"), &[0x1_8000_0000]);
        assert!(table.candidates("sys").is_empty());
    }
}
