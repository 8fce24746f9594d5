// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `PageProvider` collaborator interface (§6) and the Page Assembler
//! (§4.1) that turns a sparse list of [`PageSpan`]s into a contiguous
//! on-disk-shaped buffer.

use tracing::warn;

use crate::model::{Module, PageSpan, SectionSnapshot};

/// One enumerated open file object, as `enumerate_file_objects` would
/// report it from a memory image (§6).
#[derive(Debug, Clone)]
pub struct FileObjectRef {
    pub offset: u64,
    pub name: String,
    pub handles: u32,
    pub pointers: u32,
}

/// One enumerated process (§6).
#[derive(Debug, Clone)]
pub struct ProcessRef {
    pub pid: u64,
    pub image_name: String,
    pub peb_present: bool,
    pub exit_time: Option<u64>,
    pub modules: Vec<Module>,
}

/// Abstraction over the memory-image layer. Enumeration of processes,
/// modules and drivers from raw memory structures is out of scope for this
/// crate (spec.md §1) — callers supply an implementation, typically backed
/// by a full memory-forensics framework.
///
/// Implementations must be safe to share across threads: `calculate`-style
/// callers may parallelize across modules as long as this trait and the
/// `AnalysisCache` are accessed accordingly (§5).
pub trait PageProvider: Send + Sync {
    fn enumerate_file_objects(&self) -> anyhow::Result<Vec<FileObjectRef>>;
    fn dump(&self, offset: u64) -> anyhow::Result<Vec<SectionSnapshot>>;
    fn read(&self, mem_offset: u64, len: u32) -> anyhow::Result<Vec<u8>>;
    fn enumerate_processes(&self) -> anyhow::Result<Vec<ProcessRef>>;
    fn enumerate_drivers(&self) -> anyhow::Result<Vec<Module>>;
}

/// Assembles a zero-filled buffer of `total_size` bytes from `present`,
/// reading each span's bytes from `provider`.
///
/// Each span's `mem_offset` is masked to 32 bits before the read, per
/// [`PageSpan::masked_mem_offset`]. A failed read is logged and the
/// corresponding region is left zero-filled rather than aborting assembly.
///
/// Returns `(bytes, is_complete)`, where `is_complete` is true iff every
/// span was present (no holes implied by `total_size`) and every read
/// succeeded.
pub fn assemble(
    present: &[PageSpan],
    total_size: u64,
    provider: &dyn PageProvider,
) -> (Vec<u8>, bool) {
    let mut bytes = vec![0u8; total_size as usize];
    let mut ok = true;

    let covered: u64 = present.iter().map(|s| u64::from(s.byte_count)).sum();
    if covered < total_size {
        ok = false;
    }

    for span in present {
        let mem_offset = span.masked_mem_offset();
        match provider.read(mem_offset, span.byte_count) {
            Ok(data) => {
                let start = span.file_offset as usize;
                let end = start.saturating_add(data.len()).min(bytes.len());
                if start < bytes.len() {
                    let n = end - start;
                    bytes[start..end].copy_from_slice(&data[..n]);
                }
            }
            Err(err) => {
                warn!(
                    mem_offset,
                    byte_count = span.byte_count,
                    error = %err,
                    "unable to read memory for page span; leaving zero-filled"
                );
                ok = false;
            }
        }
    }

    (bytes, ok)
}

/// Assembles a [`SectionSnapshot`] into a `ReconstructedPe`-shaped buffer of
/// `total_size` bytes. Convenience wrapper over [`assemble`] used by the
/// orchestrator.
pub fn assemble_section(
    section: &SectionSnapshot,
    total_size: u64,
    provider: &dyn PageProvider,
) -> (Vec<u8>, bool) {
    let (bytes, assembled_ok) = assemble(&section.present, total_size, provider);
    (bytes, assembled_ok && !section.padded)
}
