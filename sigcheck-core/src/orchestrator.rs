// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Validation Orchestrator (§4.8): the state machine that drives every
//! other component, selecting modules per the configured scope, finding
//! each module's backing `FileObject`, reconstructing its bytes, and
//! producing exactly one [`ModuleVerdict`] per module.

use std::io::Write as _;

use anyhow::{Context, Result};
use tracing::{debug, debug_span, warn};

use crate::catalog::CatalogIndex;
use crate::config::{Config, ModuleScope};
use crate::model::{AnalysisCache, Module, PageSpan, SectionKind, SectionSnapshot};
use crate::page::{self, FileObjectRef, PageProvider};
use crate::path_normalize;
use crate::pe::{checksum, reloc, DigestAlgorithm, PeLayout};
use crate::returncode::ReturnCode;
use crate::signature::{self, extract_digest, ExtractedDigest};
use crate::verdict::ModuleVerdict;

/// Drives the full pipeline over every module a [`Config`]'s scope selects.
///
/// Owns the [`AnalysisCache`] exclusively (§5): nothing else touches it.
/// The `PageProvider` and `CatalogIndex` are shared, read-only
/// collaborators built once by the caller.
pub struct Orchestrator<'a> {
    config: &'a Config,
    catalog: &'a CatalogIndex,
    provider: &'a dyn PageProvider,
    cache: AnalysisCache,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config, catalog: &'a CatalogIndex, provider: &'a dyn PageProvider) -> Self {
        Self {
            config,
            catalog,
            provider,
            cache: AnalysisCache::new(),
        }
    }

    /// Validates every module the configured scope selects, in the order
    /// the `PageProvider` enumerated them — no reordering permitted (§5).
    pub fn run(&mut self) -> Result<Vec<(Module, ModuleVerdict)>> {
        let _span = debug_span!("orchestrator_run", scope = ?self.config.scope).entered();

        let candidates = self.select_candidates()?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let file_objects = self.provider.enumerate_file_objects().context("enumerate file objects")?;
        debug!(modules = candidates.len(), file_objects = file_objects.len(), "selected modules");

        let mut out = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let verdict = match candidate.preempted {
                Some(verdict) => verdict,
                None => self.validate_cached(&candidate.module, &file_objects),
            };
            out.push((candidate.module, verdict));
        }
        Ok(out)
    }

    /// Module selection per §4.8 `START` and the configured
    /// [`ModuleScope`]. A `preempted` verdict means the module never reaches
    /// file-object lookup (no PEB / already terminated).
    fn select_candidates(&self) -> Result<Vec<Candidate>> {
        match self.config.scope {
            ModuleScope::Drivers => {
                let drivers = self.provider.enumerate_drivers().context("enumerate drivers")?;
                Ok(drivers
                    .into_iter()
                    .map(|module| Candidate {
                        module,
                        preempted: None,
                    })
                    .collect())
            }
            ModuleScope::ExeOnly | ModuleScope::ExeAndDlls => {
                let processes = self.provider.enumerate_processes().context("enumerate processes")?;
                let mut out = Vec::new();
                for process in processes {
                    if !process.peb_present {
                        let verdict = if process.exit_time.is_some() {
                            ModuleVerdict::Code(ReturnCode::AlreadyTerminated)
                        } else {
                            ModuleVerdict::Code(ReturnCode::NotPeb)
                        };
                        out.push(Candidate {
                            module: Module {
                                full_path: String::new(),
                                base_name: process.image_name.clone(),
                                owner_id: process.pid,
                            },
                            preempted: Some(verdict),
                        });
                        continue;
                    }

                    // `ExeOnly` reproduces the source plugin's `get_pe_modules`
                    // early-return bug (Design Notes Open Question 3): only
                    // the process's first enumerated module (its main image)
                    // is kept, never its DLLs.
                    let selected: Box<dyn Iterator<Item = Module>> = match self.config.scope {
                        ModuleScope::ExeAndDlls => Box::new(process.modules.into_iter()),
                        ModuleScope::ExeOnly => Box::new(process.modules.into_iter().take(1)),
                        ModuleScope::Drivers => unreachable!("handled above"),
                    };
                    out.extend(selected.map(|module| Candidate { module, preempted: None }));
                }
                Ok(out)
            }
        }
    }

    fn validate_cached(&mut self, module: &Module, file_objects: &[FileObjectRef]) -> ModuleVerdict {
        if let Some(cached) = self.cache.get(&module.full_path) {
            debug!(path = %module.full_path, "analysis cache hit");
            return cached;
        }
        let verdict = self.validate_module(module, file_objects);
        self.cache.insert(&module.full_path, verdict.clone());
        verdict
    }

    fn validate_module(&self, module: &Module, file_objects: &[FileObjectRef]) -> ModuleVerdict {
        let _span = debug_span!("validate_module", path = %module.full_path).entered();

        let Some(file_object) = file_objects
            .iter()
            .find(|fo| path_normalize::matches_device_path(&module.full_path, &fo.name))
        else {
            warn!("no matching FileObject for module");
            return ReturnCode::FileObjectError.into();
        };

        let sections = match self.provider.dump(file_object.offset) {
            Ok(sections) => sections,
            Err(err) => {
                warn!(error = %err, "dump() failed for FileObject");
                return ReturnCode::FileObjectError.into();
            }
        };

        // Mirrors the source plugin's `extract_object`: the first usable
        // (non-`SharedCacheMap`) snapshot wins, whether or not it turns out
        // to be fully resident.
        let Some(section) = sections.iter().find(|s| s.is_usable()) else {
            warn!("no usable (non-SharedCacheMap) section for FileObject");
            return ReturnCode::FileObjectError.into();
        };

        let extension = extension_of(&file_object.name);
        let (bytes, complete) = reconstruct(section, self.provider);

        if complete {
            self.validate_full(section.kind, bytes, &extension)
        } else {
            self.validate_partial(section, bytes, &file_object.name)
        }
    }

    /// `VALIDATE_FULL` (§4.8).
    fn validate_full(&self, kind: SectionKind, bytes: Vec<u8>, extension: &str) -> ModuleVerdict {
        match kind {
            SectionKind::ImageSectionObject => {
                // Present spans are page-granular (4 KiB-aligned); the
                // on-disk size is FileAlignment-aligned. Trim the same way
                // the data path does before the checksum/rebase loop, or
                // trailing padding throws off the checksum (it folds in
                // `data.len()`) and every candidate base looks wrong.
                let Ok(layout) = PeLayout::parse(&bytes) else {
                    return ReturnCode::PeRebuiltFailed.into();
                };
                let total = layout.total_on_disk_size() as usize;
                let trimmed = if total <= bytes.len() { bytes[..total].to_vec() } else { bytes };
                match self.rebase_until_checksum_valid(trimmed, extension) {
                    Some((rebased, layout)) => self.verify_pe(&rebased, &layout, true),
                    None => ReturnCode::PeRebuiltFailed.into(),
                }
            }
            SectionKind::DataSectionObject => {
                let Ok(layout) = PeLayout::parse(&bytes) else {
                    return ReturnCode::PeRebuiltFailed.into();
                };
                let total = layout.total_on_disk_size() as usize;
                let trimmed = if total <= bytes.len() { &bytes[..total] } else { &bytes[..] };
                let Ok(layout) = PeLayout::parse(trimmed) else {
                    return ReturnCode::PeRebuiltFailed.into();
                };
                if checksum::verify(trimmed, &layout) {
                    self.verify_pe(trimmed, &layout, false)
                } else {
                    ReturnCode::PeChecksumMismatch.into()
                }
            }
            SectionKind::SharedCacheMap => unreachable!("is_usable() filters this out"),
        }
    }

    /// `VERIFY_PE` (§4.8): embedded-signature digest match + CMS
    /// verification, or catalog lookup when no certificate is present.
    fn verify_pe(&self, bytes: &[u8], layout: &PeLayout, from_rebase: bool) -> ModuleVerdict {
        if layout.security_dir.is_present() {
            let start = layout.security_dir.file_offset as usize;
            let end = start.saturating_add(layout.security_dir.size as usize);
            let Some(cert_blob) = bytes.get(start..end) else {
                return ReturnCode::PartialCertificate.into();
            };

            let Some(ExtractedDigest { algorithm, expected_digest }) = extract_digest(cert_blob) else {
                return ReturnCode::PartialCertificate.into();
            };

            let digest = crate::pe::authenticode_digest(bytes, layout, algorithm);
            if digest != expected_digest {
                return if from_rebase {
                    ReturnCode::AuthenticodeSignatureMismatchOrIncorrectImagebase.into()
                } else {
                    ReturnCode::AuthenticodeSignatureMismatch.into()
                };
            }

            self.verify_embedded_signature(cert_blob)
        } else {
            let digest = crate::pe::authenticode_digest(bytes, layout, DigestAlgorithm::Sha1);
            if self.catalog.contains(DigestAlgorithm::Sha1, &digest) {
                ReturnCode::CatalogSigned.into()
            } else if from_rebase {
                ReturnCode::NotSignedOrIncorrectImagebase.into()
            } else {
                ReturnCode::NotSigned.into()
            }
        }
    }

    /// Runs the CMS Verifier (§4.6) over an embedded `WIN_CERTIFICATE` blob,
    /// whose digest has already matched the computed Authenticode hash.
    ///
    /// Per Testable Property 5 and the Design Notes ("External CMS
    /// verifier"), the blob is first persisted to a scoped temp file so an
    /// operator has the exact verified bytes available for independent
    /// inspection; the file is removed when `_scratch` drops at the end of
    /// this call, on every exit path.
    fn verify_embedded_signature(&self, cert_blob: &[u8]) -> ModuleVerdict {
        let mut scratch = match tempfile::NamedTempFile::new() {
            Ok(f) => f,
            Err(err) => {
                warn!(error = %err, "unable to create scratch file for embedded certificate");
                return ReturnCode::SignedFileNotVerified.into();
            }
        };
        if let Err(err) = scratch.write_all(cert_blob) {
            warn!(error = %err, "unable to persist embedded certificate to scratch file");
            return ReturnCode::SignedFileNotVerified.into();
        }

        let verdict = match signature::verify_signed_data(cert_blob, &self.config.ca_dir) {
            Ok(outcome) if outcome.trusted => ModuleVerdict::Verified(outcome.message),
            Ok(_) => ReturnCode::SignedFileNotVerified.into(),
            Err(err) => {
                warn!(error = %err, "CMS verification did not run");
                ReturnCode::SignedFileNotVerified.into()
            }
        };
        drop(scratch);
        verdict
    }

    /// `VALIDATE_PARTIAL` (§4.8): last-page heuristic over whatever bytes
    /// memory residence actually gave us.
    fn validate_partial(&self, section: &SectionSnapshot, bytes: Vec<u8>, file_object_name: &str) -> ModuleVerdict {
        let layout = match PeLayout::parse(&bytes) {
            Ok(layout) => layout,
            Err(_) => return ReturnCode::PartialContentPeDataError.into(),
        };

        if !layout.security_dir.is_present() {
            return if path_normalize::looks_like_windows_system_path(file_object_name) {
                ReturnCode::PartialContentMaybeCatalogSigned.into()
            } else {
                ReturnCode::PartialContentNotSigned.into()
            };
        }

        match section.kind {
            SectionKind::ImageSectionObject => {
                // The Security directory is a file offset, never mapped
                // into an ImageSectionObject's address space.
                ReturnCode::ContentSignedNotVerified.into()
            }
            SectionKind::DataSectionObject => {
                let start = layout.security_dir.file_offset as u64;
                let size = u64::from(layout.security_dir.size);
                let end = start + size;
                let cert_range_ok = end <= bytes.len() as u64 && range_fully_resident(&section.present, start, end);

                if !cert_range_ok {
                    return ReturnCode::ContentSignedNotVerified.into();
                }
                let cert_blob = &bytes[start as usize..end as usize];
                let verdict = self.verify_embedded_signature(cert_blob);
                ModuleVerdict::CodeWithDetail(ReturnCode::PartialContentVerified, verdict.message())
            }
            SectionKind::SharedCacheMap => unreachable!("is_usable() filters this out"),
        }
    }

    fn rebase_until_checksum_valid(&self, bytes: Vec<u8>, extension: &str) -> Option<(Vec<u8>, PeLayout)> {
        let layout = PeLayout::parse(&bytes).ok()?;
        if checksum::verify(&bytes, &layout) {
            return Some((bytes, layout));
        }

        let old_base = read_image_base(&bytes, &layout)?;
        for &candidate in self.config.frequent_addresses.candidates(extension) {
            if !layout.is_pe32_plus && candidate > 0xFFFF_FFFF {
                continue;
            }
            let Ok(rebased) = reloc::rebase(&bytes, &layout, old_base, candidate) else {
                continue;
            };
            let Ok(rebased_layout) = PeLayout::parse(&rebased) else {
                continue;
            };
            if checksum::verify(&rebased, &rebased_layout) {
                return Some((rebased, rebased_layout));
            }
        }
        None
    }
}

struct Candidate {
    module: Module,
    /// Set when module selection already determined the verdict (no PEB /
    /// already terminated) and file-object lookup should be skipped.
    preempted: Option<ModuleVerdict>,
}

/// Page Assembler invocation (§4.1), sized to the furthest extent any
/// present span claims to cover. Both section kinds are later trimmed down
/// to the PE's real on-disk size once headers are parsed (`validate_full`),
/// since page-granular residency routinely leaves trailing padding past
/// `total_on_disk_size()`.
fn reconstruct(section: &SectionSnapshot, provider: &dyn PageProvider) -> (Vec<u8>, bool) {
    let total_size = section
        .present
        .iter()
        .map(|s| s.file_offset + u64::from(s.byte_count))
        .max()
        .unwrap_or(0);
    page::assemble_section(section, total_size, provider)
}

/// `true` iff every byte in `[start, end)` is covered by the union of
/// `present` spans — used to decide whether a partially-resident module's
/// embedded certificate bytes are actually backed by memory, rather than
/// zero-filled holes that merely happen to fall inside the buffer's
/// allocated length.
fn range_fully_resident(present: &[PageSpan], start: u64, end: u64) -> bool {
    if start >= end {
        return false;
    }
    let mut intervals: Vec<(u64, u64)> = present
        .iter()
        .map(|s| (s.file_offset, s.file_offset + u64::from(s.byte_count)))
        .collect();
    intervals.sort_unstable_by_key(|iv| iv.0);

    let mut cursor = start;
    for (s, e) in intervals {
        if e <= cursor {
            continue;
        }
        if s > cursor {
            break;
        }
        cursor = cursor.max(e);
        if cursor >= end {
            return true;
        }
    }
    cursor >= end
}

fn read_image_base(bytes: &[u8], layout: &PeLayout) -> Option<u64> {
    use scroll::Pread;
    let off = layout.image_base_offset();
    if layout.is_pe32_plus {
        bytes.pread_with::<u64>(off, scroll::LE).ok()
    } else {
        bytes.pread_with::<u32>(off, scroll::LE).ok().map(u64::from)
    }
}

fn extension_of(path: &str) -> String {
    path.rsplit('.').next().unwrap_or("").to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleScope;
    use crate::model::{FrequentBaseTable, SectionKind};
    use crate::page::ProcessRef;
    use crate::pe::hash::authenticode_digest;
    use crate::signature::extractor::encode_digest_pattern;
    use crate::test_support::synth_pe;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn empty_config(scope: ModuleScope) -> Config {
        Config {
            catalog_dir: std::env::temp_dir(),
            ca_dir: std::env::temp_dir(),
            scope,
            profile: "Test".into(),
            frequent_addresses: FrequentBaseTable::new(HashMap::new()),
        }
    }

    struct FakeProvider {
        file_objects: Vec<FileObjectRef>,
        sections: HashMap<u64, Vec<SectionSnapshot>>,
        pages: Mutex<HashMap<u64, Vec<u8>>>,
        processes: Vec<ProcessRef>,
        drivers: Vec<Module>,
    }

    impl PageProvider for FakeProvider {
        fn enumerate_file_objects(&self) -> Result<Vec<FileObjectRef>> {
            Ok(self.file_objects.clone())
        }
        fn dump(&self, offset: u64) -> Result<Vec<SectionSnapshot>> {
            Ok(self.sections.get(&offset).cloned().unwrap_or_default())
        }
        fn read(&self, mem_offset: u64, len: u32) -> Result<Vec<u8>> {
            self.pages
                .lock()
                .unwrap()
                .get(&mem_offset)
                .cloned()
                .filter(|b| b.len() == len as usize)
                .ok_or_else(|| anyhow::anyhow!("no page at {mem_offset:#x}"))
        }
        fn enumerate_processes(&self) -> Result<Vec<ProcessRef>> {
            Ok(self.processes.clone())
        }
        fn enumerate_drivers(&self) -> Result<Vec<Module>> {
            Ok(self.drivers.clone())
        }
    }

    fn single_page_section(name: &str, kind: SectionKind, bytes: &[u8]) -> (SectionSnapshot, (u64, Vec<u8>)) {
        let mem_offset = 0x1000u64;
        let span = PageSpan {
            mem_offset,
            file_offset: 0,
            byte_count: bytes.len() as u32,
        };
        let section = SectionSnapshot {
            name: name.to_string(),
            kind,
            present: vec![span],
            padded: false,
        };
        (section, (mem_offset, bytes.to_vec()))
    }

    #[test]
    fn unsigned_data_section_with_no_catalog_entry_is_not_signed() {
        let pe = synth_pe::build(synth_pe::Options::default());
        let mut pe = pe;
        let layout = PeLayout::parse(&pe).unwrap();
        let cksum = checksum::compute(&pe, layout.checksum_field_offset);
        let off = layout.checksum_field_offset as usize;
        pe[off..off + 4].copy_from_slice(&cksum.to_le_bytes());

        let name = r"\Device\HarddiskVolume2\Windows\System32\notepad.exe";
        let (section, (mem_offset, bytes)) = single_page_section(name, SectionKind::DataSectionObject, &pe);

        let mut pages = HashMap::new();
        pages.insert(mem_offset, bytes);
        let mut sections = HashMap::new();
        sections.insert(0u64, vec![section]);

        let provider = FakeProvider {
            file_objects: vec![FileObjectRef {
                offset: 0,
                name: name.to_string(),
                handles: 1,
                pointers: 1,
            }],
            sections,
            pages: Mutex::new(pages),
            processes: vec![],
            drivers: vec![],
        };

        let config = empty_config(ModuleScope::ExeOnly);
        let catalog = CatalogIndex::default();
        let mut orch = Orchestrator::new(&config, &catalog, &provider);

        let module = Module {
            full_path: r"\SystemRoot\System32\notepad.exe".into(),
            base_name: "notepad.exe".into(),
            owner_id: 4,
        };
        let file_objects = provider.enumerate_file_objects().unwrap();
        let verdict = orch.validate_cached(&module, &file_objects);
        assert_eq!(verdict, ModuleVerdict::Code(ReturnCode::NotSigned));
    }

    #[test]
    fn sha1_digest_present_in_catalog_yields_catalog_signed() {
        let pe = synth_pe::build(synth_pe::Options::default());
        let mut pe = pe;
        let layout = PeLayout::parse(&pe).unwrap();
        let cksum = checksum::compute(&pe, layout.checksum_field_offset);
        let off = layout.checksum_field_offset as usize;
        pe[off..off + 4].copy_from_slice(&cksum.to_le_bytes());
        let layout = PeLayout::parse(&pe).unwrap();
        let digest = authenticode_digest(&pe, &layout, DigestAlgorithm::Sha1);

        let name = r"\Device\HarddiskVolume2\Windows\System32\drivers\mydrv.sys";
        let (section, (mem_offset, bytes)) = single_page_section(name, SectionKind::DataSectionObject, &pe);
        let mut pages = HashMap::new();
        pages.insert(mem_offset, bytes);
        let mut sections = HashMap::new();
        sections.insert(0u64, vec![section]);

        let catalog_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            catalog_dir.path().join("pkg.cat"),
            encode_digest_pattern(DigestAlgorithm::Sha1, &digest),
        )
        .unwrap();
        let catalog = CatalogIndex::build(catalog_dir.path()).unwrap();

        let provider = FakeProvider {
            file_objects: vec![FileObjectRef {
                offset: 0,
                name: name.to_string(),
                handles: 1,
                pointers: 1,
            }],
            sections,
            pages: Mutex::new(pages),
            processes: vec![],
            drivers: vec![Module {
                full_path: name.to_string(),
                base_name: "mydrv.sys".into(),
                owner_id: 0,
            }],
        };

        let config = empty_config(ModuleScope::Drivers);
        let mut orch = Orchestrator::new(&config, &catalog, &provider);
        let results = orch.run().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, ModuleVerdict::Code(ReturnCode::CatalogSigned));
    }

    #[test]
    fn process_with_no_peb_yields_not_peb_without_touching_file_objects() {
        let provider = FakeProvider {
            file_objects: vec![],
            sections: HashMap::new(),
            pages: Mutex::new(HashMap::new()),
            processes: vec![ProcessRef {
                pid: 1234,
                image_name: "svchost.exe".into(),
                peb_present: false,
                exit_time: None,
                modules: vec![],
            }],
            drivers: vec![],
        };
        let config = empty_config(ModuleScope::ExeOnly);
        let catalog = CatalogIndex::default();
        let mut orch = Orchestrator::new(&config, &catalog, &provider);
        let results = orch.run().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, ModuleVerdict::Code(ReturnCode::NotPeb));
    }

    #[test]
    fn terminated_process_with_no_peb_yields_already_terminated() {
        let provider = FakeProvider {
            file_objects: vec![],
            sections: HashMap::new(),
            pages: Mutex::new(HashMap::new()),
            processes: vec![ProcessRef {
                pid: 99,
                image_name: "notepad.exe".into(),
                peb_present: false,
                exit_time: Some(123456),
                modules: vec![],
            }],
            drivers: vec![],
        };
        let config = empty_config(ModuleScope::ExeOnly);
        let catalog = CatalogIndex::default();
        let mut orch = Orchestrator::new(&config, &catalog, &provider);
        let results = orch.run().unwrap();
        assert_eq!(results[0].1, ModuleVerdict::Code(ReturnCode::AlreadyTerminated));
    }

    #[test]
    fn exe_only_scope_keeps_only_the_first_module_per_process() {
        let provider = FakeProvider {
            file_objects: vec![],
            sections: HashMap::new(),
            pages: Mutex::new(HashMap::new()),
            processes: vec![ProcessRef {
                pid: 7,
                image_name: "app.exe".into(),
                peb_present: true,
                exit_time: None,
                modules: vec![
                    Module {
                        full_path: r"\Device\HarddiskVolume2\app.exe".into(),
                        base_name: "app.exe".into(),
                        owner_id: 7,
                    },
                    Module {
                        full_path: r"\Device\HarddiskVolume2\dep.dll".into(),
                        base_name: "dep.dll".into(),
                        owner_id: 7,
                    },
                ],
            }],
            drivers: vec![],
        };
        let config = empty_config(ModuleScope::ExeOnly);
        let catalog = CatalogIndex::default();
        let mut orch = Orchestrator::new(&config, &catalog, &provider);
        let results = orch.run().unwrap();
        // Only the main image is selected; the missing FileObject then
        // yields FILEOBJECT_ERROR for it alone.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.base_name, "app.exe");
    }

    #[test]
    fn missing_file_object_yields_fileobject_error() {
        let provider = FakeProvider {
            file_objects: vec![],
            sections: HashMap::new(),
            pages: Mutex::new(HashMap::new()),
            processes: vec![],
            drivers: vec![Module {
                full_path: r"\Device\HarddiskVolume2\Windows\System32\drivers\ghost.sys".into(),
                base_name: "ghost.sys".into(),
                owner_id: 0,
            }],
        };
        let config = empty_config(ModuleScope::Drivers);
        let catalog = CatalogIndex::default();
        let mut orch = Orchestrator::new(&config, &catalog, &provider);
        let results = orch.run().unwrap();
        assert_eq!(results[0].1, ModuleVerdict::Code(ReturnCode::FileObjectError));
    }

    #[test]
    fn corrupt_mz_in_partial_residency_yields_pe_data_error() {
        let mut pe = synth_pe::build(synth_pe::Options::default());
        pe[0] = 0x4d;
        pe[1] = 0x5b;

        let name = r"\Device\HarddiskVolume2\Windows\System32\bad.exe";
        let span = PageSpan {
            mem_offset: 0x1000,
            file_offset: 0,
            byte_count: 8,
        };
        let section = SectionSnapshot {
            name: name.to_string(),
            kind: SectionKind::DataSectionObject,
            present: vec![span],
            padded: true,
        };
        let mut pages = HashMap::new();
        pages.insert(0x1000u64, pe[..8].to_vec());
        let mut sections = HashMap::new();
        sections.insert(0u64, vec![section]);

        let provider = FakeProvider {
            file_objects: vec![FileObjectRef {
                offset: 0,
                name: name.to_string(),
                handles: 1,
                pointers: 1,
            }],
            sections,
            pages: Mutex::new(pages),
            processes: vec![],
            drivers: vec![Module {
                full_path: name.to_string(),
                base_name: "bad.exe".into(),
                owner_id: 0,
            }],
        };

        let config = empty_config(ModuleScope::Drivers);
        let catalog = CatalogIndex::default();
        let mut orch = Orchestrator::new(&config, &catalog, &provider);
        let results = orch.run().unwrap();
        assert_eq!(results[0].1, ModuleVerdict::Code(ReturnCode::PartialContentPeDataError));
    }

    #[test]
    fn signed_data_section_with_embedded_signature_verifies_successfully() {
        // End-to-end §8 scenario 1: a fully-resident `DataSectionObject`
        // whose embedded digest matches and whose CMS signature is trusted
        // yields the verifier's own success message, not a `ReturnCode`.
        use crate::test_support::cms_fixture::{self_signed_cert, sign_content};

        let (cert, pkey) = self_signed_cert("sigcheck embedded signer");

        // The Authenticode digest never depends on the certificate blob's
        // own bytes or length (Invariant 1, §8) — only on the bytes
        // preceding it, which are unaffected by the eventual real
        // certificate's size. So: hash once against a placeholder-sized
        // certificate to learn the digest, then sign that digest and
        // rebuild with the real (differently sized) certificate.
        let placeholder = synth_pe::build(synth_pe::Options {
            cert_bytes: Some(vec![0u8; 32]),
            ..Default::default()
        });
        let placeholder_layout = PeLayout::parse(&placeholder).unwrap();
        let digest = authenticode_digest(&placeholder, &placeholder_layout, DigestAlgorithm::Sha256);

        let content = encode_digest_pattern(DigestAlgorithm::Sha256, &digest);
        let signed_der = sign_content(&cert, &pkey, &content);

        let mut pe = synth_pe::build(synth_pe::Options {
            cert_bytes: Some(signed_der),
            ..Default::default()
        });
        let layout = PeLayout::parse(&pe).unwrap();
        assert_eq!(
            authenticode_digest(&pe, &layout, DigestAlgorithm::Sha256),
            digest,
            "the real certificate's differing length must not change the excluded-region digest"
        );

        let cksum = checksum::compute(&pe, layout.checksum_field_offset);
        let off = layout.checksum_field_offset as usize;
        pe[off..off + 4].copy_from_slice(&cksum.to_le_bytes());

        let name = r"\Device\HarddiskVolume2\Windows\System32\signed.exe";
        let (section, (mem_offset, bytes)) = single_page_section(name, SectionKind::DataSectionObject, &pe);
        let mut pages = HashMap::new();
        pages.insert(mem_offset, bytes);
        let mut sections = HashMap::new();
        sections.insert(0u64, vec![section]);

        let provider = FakeProvider {
            file_objects: vec![FileObjectRef {
                offset: 0,
                name: name.to_string(),
                handles: 1,
                pointers: 1,
            }],
            sections,
            pages: Mutex::new(pages),
            processes: vec![],
            drivers: vec![Module {
                full_path: name.to_string(),
                base_name: "signed.exe".into(),
                owner_id: 0,
            }],
        };

        let ca_dir = tempfile::tempdir().unwrap();
        std::fs::write(ca_dir.path().join("signer.pem"), cert.to_pem().unwrap()).unwrap();

        let config = Config {
            catalog_dir: std::env::temp_dir(),
            ca_dir: ca_dir.path().to_path_buf(),
            scope: ModuleScope::Drivers,
            profile: "Test".into(),
            frequent_addresses: FrequentBaseTable::new(HashMap::new()),
        };
        let catalog = CatalogIndex::default();
        let mut orch = Orchestrator::new(&config, &catalog, &provider);
        let results = orch.run().unwrap();

        assert_eq!(results.len(), 1);
        match &results[0].1 {
            ModuleVerdict::Verified(msg) => assert_eq!(msg, "Verification successful"),
            other => panic!("expected a verified embedded signature, got {other:?}"),
        }
    }

    #[test]
    fn image_section_object_rebases_to_candidate_base_and_verifies_embedded_signature() {
        // End-to-end §8 scenario 3: a fully-resident `ImageSectionObject`
        // whose checksum fails at its in-memory base succeeds once rebased
        // to the correct candidate from `FrequentBaseTable["dll"]`, and the
        // embedded signature then verifies.
        use crate::test_support::cms_fixture::{self_signed_cert, sign_content};

        let (cert, pkey) = self_signed_cert("sigcheck rebase signer");

        let original_base: u64 = 0x1_8000_0000;
        let mem_base: u64 = 0x7ffc_1234_0000;

        let base_opts = || synth_pe::Options {
            is_64: true,
            image_base: original_base,
            relocations: vec![synth_pe::Reloc::Dir64 {
                section_relative_offset: 0x10,
            }],
            ..Default::default()
        };

        let placeholder = synth_pe::build(synth_pe::Options {
            cert_bytes: Some(vec![0u8; 32]),
            ..base_opts()
        });
        let placeholder_layout = PeLayout::parse(&placeholder).unwrap();
        let digest = authenticode_digest(&placeholder, &placeholder_layout, DigestAlgorithm::Sha256);

        let content = encode_digest_pattern(DigestAlgorithm::Sha256, &digest);
        let signed_der = sign_content(&cert, &pkey, &content);

        let mut on_disk = synth_pe::build(synth_pe::Options {
            cert_bytes: Some(signed_der),
            ..base_opts()
        });
        let layout = PeLayout::parse(&on_disk).unwrap();
        assert_eq!(
            authenticode_digest(&on_disk, &layout, DigestAlgorithm::Sha256),
            digest
        );

        let cksum = checksum::compute(&on_disk, layout.checksum_field_offset);
        let off = layout.checksum_field_offset as usize;
        on_disk[off..off + 4].copy_from_slice(&cksum.to_le_bytes());
        let layout = PeLayout::parse(&on_disk).unwrap();
        assert!(checksum::verify(&on_disk, &layout));

        // The bytes an `ImageSectionObject` actually holds: the same image,
        // relocated as if mapped at a different in-memory base.
        let mem_bytes = reloc::rebase(&on_disk, &layout, original_base, mem_base).unwrap();
        let mem_layout = PeLayout::parse(&mem_bytes).unwrap();
        assert!(
            !checksum::verify(&mem_bytes, &mem_layout),
            "checksum must mismatch at the wrong in-memory base"
        );

        let name = r"\Device\HarddiskVolume2\Program Files\App\app.dll";
        let (section, (mem_offset, bytes)) = single_page_section(name, SectionKind::ImageSectionObject, &mem_bytes);
        let mut pages = HashMap::new();
        pages.insert(mem_offset, bytes);
        let mut sections = HashMap::new();
        sections.insert(0u64, vec![section]);

        let provider = FakeProvider {
            file_objects: vec![FileObjectRef {
                offset: 0,
                name: name.to_string(),
                handles: 1,
                pointers: 1,
            }],
            sections,
            pages: Mutex::new(pages),
            processes: vec![],
            drivers: vec![Module {
                full_path: name.to_string(),
                base_name: "app.dll".into(),
                owner_id: 0,
            }],
        };

        let ca_dir = tempfile::tempdir().unwrap();
        std::fs::write(ca_dir.path().join("signer.pem"), cert.to_pem().unwrap()).unwrap();

        let mut addresses = HashMap::new();
        addresses.insert("dll".to_string(), vec![original_base]);

        let config = Config {
            catalog_dir: std::env::temp_dir(),
            ca_dir: ca_dir.path().to_path_buf(),
            scope: ModuleScope::Drivers,
            profile: "Test".into(),
            frequent_addresses: FrequentBaseTable::new(addresses),
        };
        let catalog = CatalogIndex::default();
        let mut orch = Orchestrator::new(&config, &catalog, &provider);
        let results = orch.run().unwrap();

        assert_eq!(results.len(), 1);
        match &results[0].1 {
            ModuleVerdict::Verified(msg) => assert_eq!(msg, "Verification successful"),
            other => panic!("expected a verified embedded signature after rebase, got {other:?}"),
        }
    }

    #[test]
    fn range_fully_resident_detects_gaps_and_full_coverage() {
        let spans = vec![
            PageSpan { mem_offset: 0, file_offset: 0, byte_count: 10 },
            PageSpan { mem_offset: 0, file_offset: 20, byte_count: 10 },
        ];
        assert!(range_fully_resident(&spans, 0, 10));
        assert!(!range_fully_resident(&spans, 5, 25));
        assert!(range_fully_resident(&spans, 20, 30));
    }
}
