// SPDX-License-Identifier: MIT OR Apache-2.0
//! A concrete [`PageProvider`] adapter over a flat memory-image file plus a
//! JSON manifest describing the file objects, processes, drivers and
//! section snapshots that a real memory-forensics framework would
//! otherwise reconstruct from kernel structures (spec.md §1, out of
//! scope).
//!
//! This is deliberately thin: it does not infer anything from the image
//! bytes beyond "read `len` bytes at this offset". Everything it reports —
//! which files exist, which processes loaded which modules, which pages of
//! which section are resident — comes straight from the manifest, so this
//! crate's own reconstruction/hashing/verification logic is exercised the
//! same way it would be against a real framework's adapter.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{Module, SectionSnapshot};
use crate::page::{FileObjectRef, PageProvider, ProcessRef};

#[derive(Debug, Deserialize)]
struct ManifestFileObject {
    offset: u64,
    name: String,
    #[serde(default)]
    handles: u32,
    #[serde(default)]
    pointers: u32,
}

#[derive(Debug, Deserialize)]
struct ManifestProcess {
    pid: u64,
    image_name: String,
    #[serde(default)]
    peb_present: bool,
    #[serde(default)]
    exit_time: Option<u64>,
    #[serde(default)]
    modules: Vec<Module>,
}

/// On-disk shape of the manifest file. `sections` is keyed by the decimal
/// string of a `ManifestFileObject::offset`, since JSON object keys are
/// always strings.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    file_objects: Vec<ManifestFileObject>,
    #[serde(default)]
    processes: Vec<ManifestProcess>,
    #[serde(default)]
    drivers: Vec<Module>,
    #[serde(default)]
    sections: HashMap<String, Vec<SectionSnapshot>>,
}

/// A [`PageProvider`] backed by a flat memory-image file and a JSON
/// manifest. `FlatFileMemoryProvider::open` is the constructor CLI and test
/// callers use; the `memory` file is opened once and read with seeks under
/// a mutex so the provider stays `Sync` for parallel embedders (§5).
pub struct FlatFileMemoryProvider {
    memory: Mutex<File>,
    manifest: Manifest,
}

impl FlatFileMemoryProvider {
    pub fn open(memory_path: &Path, manifest_path: &Path) -> Result<Self> {
        let memory = File::open(memory_path)
            .with_context(|| format!("open memory image {}", memory_path.display()))?;
        let manifest_text = std::fs::read_to_string(manifest_path)
            .with_context(|| format!("read manifest {}", manifest_path.display()))?;
        let manifest: Manifest = serde_json::from_str(&manifest_text)
            .with_context(|| format!("parse manifest {}", manifest_path.display()))?;
        Ok(Self {
            memory: Mutex::new(memory),
            manifest,
        })
    }
}

impl PageProvider for FlatFileMemoryProvider {
    fn enumerate_file_objects(&self) -> Result<Vec<FileObjectRef>> {
        Ok(self
            .manifest
            .file_objects
            .iter()
            .map(|f| FileObjectRef {
                offset: f.offset,
                name: f.name.clone(),
                handles: f.handles,
                pointers: f.pointers,
            })
            .collect())
    }

    fn dump(&self, offset: u64) -> Result<Vec<SectionSnapshot>> {
        Ok(self
            .manifest
            .sections
            .get(&offset.to_string())
            .cloned()
            .unwrap_or_default())
    }

    fn read(&self, mem_offset: u64, len: u32) -> Result<Vec<u8>> {
        let mut file = self
            .memory
            .lock()
            .expect("memory image mutex is never poisoned by a panicking holder");
        file.seek(SeekFrom::Start(mem_offset))
            .with_context(|| format!("seek to {mem_offset:#x}"))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)
            .with_context(|| format!("read {len} bytes at {mem_offset:#x}"))?;
        Ok(buf)
    }

    fn enumerate_processes(&self) -> Result<Vec<ProcessRef>> {
        Ok(self
            .manifest
            .processes
            .iter()
            .map(|p| ProcessRef {
                pid: p.pid,
                image_name: p.image_name.clone(),
                peb_present: p.peb_present,
                exit_time: p.exit_time,
                modules: p.modules.clone(),
            })
            .collect())
    }

    fn enumerate_drivers(&self) -> Result<Vec<Module>> {
        Ok(self.manifest.drivers.clone())
    }
}

/// Convenience used by `sigcheck-cli` to resolve `--manifest`'s default
/// location relative to `--memory`, when the flag is omitted.
pub fn default_manifest_path(memory_path: &Path) -> PathBuf {
    memory_path.with_extension("manifest.json")
}
