// SPDX-License-Identifier: MIT OR Apache-2.0
//! Explicit configuration, injected into the orchestrator rather than held
//! as module-wide plugin state (Design Notes, "Cyclic/global state").

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::model::FrequentBaseTable;

/// Which module kinds a run should verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleScope {
    /// Each process's main executable image only.
    ExeOnly,
    /// Each process's main image plus every loaded DLL.
    ExeAndDlls,
    /// Kernel drivers instead of user-mode processes.
    Drivers,
}

/// Everything a run of the orchestrator needs, built once by the caller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of `.cat` catalog files to search for hash-only signatures.
    pub catalog_dir: PathBuf,
    /// CA trust directory handed to the CMS verifier.
    pub ca_dir: PathBuf,
    pub scope: ModuleScope,
    /// Active profile tag, used to select a `FrequentBaseTable` row.
    pub profile: String,
    pub frequent_addresses: FrequentBaseTable,
}

impl Config {
    /// Builds a `Config`, loading `addresses.json` from `addresses_path`.
    ///
    /// `addresses.json`'s shape is `{ profile_tag: { "exe"|"dll"|"sys": [hex, ...] } }`.
    pub fn load(
        catalog_dir: PathBuf,
        ca_dir: PathBuf,
        scope: ModuleScope,
        profile: String,
        addresses_path: &Path,
    ) -> Result<Self> {
        let frequent_addresses = load_frequent_addresses(addresses_path, &profile)?;
        Ok(Self {
            catalog_dir,
            ca_dir,
            scope,
            profile,
            frequent_addresses,
        })
    }
}

/// Raw shape of `addresses.json`: profile tag -> extension -> hex strings.
type AddressFile = HashMap<String, HashMap<String, Vec<String>>>;

/// Loads the frequent-address table for `profile`.
///
/// If `profile` is absent, this falls back to the lexicographically-first
/// profile key (a deterministic choice; the source plugin this was derived
/// from returned whichever key its host's hash-map iteration produced last,
/// which is observably non-deterministic — see Open Question 2).
fn load_frequent_addresses(path: &Path, profile: &str) -> Result<FrequentBaseTable> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read addresses file {}", path.display()))?;
    let data: AddressFile = serde_json::from_str(&text)
        .with_context(|| format!("parse addresses file {}", path.display()))?;

    let row = if let Some(row) = data.get(profile) {
        row
    } else {
        let mut keys: Vec<&String> = data.keys().collect();
        keys.sort();
        let Some(fallback) = keys.first() else {
            anyhow::bail!("addresses file {} has no profiles", path.display());
        };
        warn!(
            profile,
            fallback = fallback.as_str(),
            "profile not found in addresses file, using lexicographically-first profile"
        );
        data.get(fallback.as_str()).expect("key came from data")
    };

    let mut by_extension = HashMap::new();
    for (extension, hex_values) in row {
        let mut bases = Vec::with_capacity(hex_values.len());
        for hex in hex_values {
            let trimmed = hex.trim_start_matches("0x").trim_start_matches("0X");
            let base = u64::from_str_radix(trimmed, 16)
                .with_context(|| format!("parse candidate base '{hex}' for .{extension}"))?;
            bases.push(base);
        }
        by_extension.insert(extension.to_ascii_lowercase(), bases);
    }

    Ok(FrequentBaseTable::new(by_extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_addresses(json: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_candidates_for_known_profile() {
        let f = write_addresses(
            r#"{"Win10x64": {"dll": ["0x180000000", "0x7ffe0000"], "exe": ["0x140000000"]}}"#,
        );
        let table = load_frequent_addresses(f.path(), "Win10x64").unwrap();
        assert_eq!(table.candidates("dll"), &[0x1_8000_0000, 0x7ffe_0000]);
        assert_eq!(table.candidates("exe"), &[0x1_4000_0000]);
    }

    #[test]
    fn falls_back_to_lexicographically_first_profile_when_missing() {
        let f = write_addresses(
            r#"{"Win10x64": {"dll": ["0x180000000"]}, "WinXPSP3x86": {"dll": ["0x10000000"]}}"#,
        );
        // "Win10x64" sorts before "WinXPSP3x86" lexicographically.
        let table = load_frequent_addresses(f.path(), "MissingProfile").unwrap();
        assert_eq!(table.candidates("dll"), &[0x1_8000_0000]);
    }
}
