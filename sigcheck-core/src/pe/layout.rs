// SPDX-License-Identifier: MIT OR Apache-2.0
//! Offset-based PE/COFF header reading (§4.2).
//!
//! This module deliberately does not go through a structured PE parsing
//! library for any field that feeds the Authenticode hash exclusion
//! windows or the relocation rebaser: those need the *exact* byte offsets
//! the Authenticode spec defines, independent of how any particular parser
//! chooses to model the file. Reads are little-endian via `scroll`.

use scroll::Pread;
use thiserror::Error;

const E_LFANEW_OFFSET: usize = 0x3c;
const PE_MAGIC32: u16 = 0x010b;
const PE_MAGIC64: u16 = 0x020b;
const CHECKSUM_REL_OFFSET: u32 = 0x58;
const SECURITY_DIR_REL_OFFSET_32: u32 = 0x98;
const SECURITY_DIR_REL_OFFSET_64: u32 = 0xa8;
const COFF_HEADER_SIZE: u32 = 24; // signature(4) + IMAGE_FILE_HEADER(20)

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeLayoutError {
    #[error("buffer too short to contain a DOS header")]
    TooShortForDosHeader,
    #[error("missing 'MZ' signature")]
    MissingMzSignature,
    #[error("e_lfanew points outside the buffer")]
    NtHeaderOffsetOutOfBounds,
    #[error("missing 'PE\\0\\0' signature at e_lfanew")]
    MissingPeSignature,
    #[error("unrecognized OptionalHeader.Magic {0:#06x}")]
    UnrecognizedMagic(u16),
    #[error("buffer too short to contain the fields at offset {0:#x}")]
    TruncatedHeader(usize),
}

/// One `IMAGE_SECTION_HEADER`'s raw-data and virtual-mapping coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRawInfo {
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub pointer_to_raw_data: u32,
    pub size_of_raw_data: u32,
}

/// The Security (Certificate Table) data directory: `(file_offset, size)`.
///
/// Unlike every other data directory, this one is a **file offset**, not an
/// RVA (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityDirectory {
    pub file_offset: u32,
    pub size: u32,
}

impl SecurityDirectory {
    pub fn is_present(&self) -> bool {
        self.file_offset != 0 && self.size != 0
    }
}

/// A generic `(VirtualAddress, Size)` data directory entry. Unlike the
/// Security directory, `virtual_address` here really is an RVA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0 && self.size != 0
    }
}

/// Purely offset-derived PE layout facts, used by the hasher and rebaser.
#[derive(Debug, Clone)]
pub struct PeLayout {
    pub nt_header_offset: u32,
    pub is_pe32_plus: bool,
    /// Offset, in the buffer, of `OptionalHeader.CheckSum`.
    pub checksum_field_offset: u32,
    /// Offset, in the buffer, of the Security data directory entry.
    pub security_dir_offset: u32,
    pub security_dir: SecurityDirectory,
    /// Base Relocation data directory (index 5, the entry right after
    /// Security) — an ordinary RVA/size pair, used by the Relocation
    /// Rebaser (§4.4).
    pub base_relocation_dir: DataDirectory,
    pub size_of_headers: u32,
    pub sections: Vec<SectionRawInfo>,
}

impl PeLayout {
    /// Parses headers from `data`, validating the invariants listed in §3
    /// (`MZ` signature, `e_lfanew` -> `PE\0\0`, recognized `Magic`).
    pub fn parse(data: &[u8]) -> Result<Self, PeLayoutError> {
        if data.len() < E_LFANEW_OFFSET + 4 {
            return Err(PeLayoutError::TooShortForDosHeader);
        }
        if &data[0..2] != b"MZ" {
            return Err(PeLayoutError::MissingMzSignature);
        }

        let nt_header_offset: u32 = data
            .pread_with(E_LFANEW_OFFSET, scroll::LE)
            .map_err(|_| PeLayoutError::NtHeaderOffsetOutOfBounds)?;
        let nt_off = nt_header_offset as usize;

        let signature = data
            .get(nt_off..nt_off + 4)
            .ok_or(PeLayoutError::NtHeaderOffsetOutOfBounds)?;
        if signature != b"PE\0\0" {
            return Err(PeLayoutError::MissingPeSignature);
        }

        let magic_offset = nt_off + 0x18;
        let magic: u16 = data
            .pread_with(magic_offset, scroll::LE)
            .map_err(|_| PeLayoutError::TruncatedHeader(magic_offset))?;
        let is_pe32_plus = match magic {
            PE_MAGIC32 => false,
            PE_MAGIC64 => true,
            other => return Err(PeLayoutError::UnrecognizedMagic(other)),
        };

        let checksum_field_offset = nt_header_offset + CHECKSUM_REL_OFFSET;
        let security_dir_offset = nt_header_offset
            + if is_pe32_plus {
                SECURITY_DIR_REL_OFFSET_64
            } else {
                SECURITY_DIR_REL_OFFSET_32
            };

        let sec_off = security_dir_offset as usize;
        let sec_file_offset: u32 = data
            .pread_with(sec_off, scroll::LE)
            .map_err(|_| PeLayoutError::TruncatedHeader(sec_off))?;
        let sec_size: u32 = data
            .pread_with(sec_off + 4, scroll::LE)
            .map_err(|_| PeLayoutError::TruncatedHeader(sec_off + 4))?;

        // Base Relocation is data-directory index 5, immediately after
        // Security (index 4): same 8-byte stride, next slot.
        let reloc_off = sec_off + 8;
        let reloc_va: u32 = data
            .pread_with(reloc_off, scroll::LE)
            .map_err(|_| PeLayoutError::TruncatedHeader(reloc_off))?;
        let reloc_size: u32 = data
            .pread_with(reloc_off + 4, scroll::LE)
            .map_err(|_| PeLayoutError::TruncatedHeader(reloc_off + 4))?;

        // SizeOfHeaders lives at relative OptionalHeader offset 0x3c for
        // both 32- and 64-bit layouts (absolute = nt_off + COFF header (24) + 0x3c).
        let size_of_headers_off = nt_off + COFF_HEADER_SIZE as usize + 0x3c;
        let size_of_headers: u32 = data
            .pread_with(size_of_headers_off, scroll::LE)
            .map_err(|_| PeLayoutError::TruncatedHeader(size_of_headers_off))?;

        let num_sections_off = nt_off + 6;
        let num_sections: u16 = data
            .pread_with(num_sections_off, scroll::LE)
            .map_err(|_| PeLayoutError::TruncatedHeader(num_sections_off))?;
        let size_of_optional_header_off = nt_off + 20;
        let size_of_optional_header: u16 = data
            .pread_with(size_of_optional_header_off, scroll::LE)
            .map_err(|_| PeLayoutError::TruncatedHeader(size_of_optional_header_off))?;

        let section_table_off =
            nt_off + COFF_HEADER_SIZE as usize + size_of_optional_header as usize;
        let mut sections = Vec::with_capacity(num_sections as usize);
        for i in 0..num_sections as usize {
            // IMAGE_SECTION_HEADER: Name[8], VirtualSize(4), VirtualAddress(4),
            // SizeOfRawData(4) @ +16, PointerToRawData(4) @ +20.
            let base = section_table_off + i * 40;
            let virtual_size: u32 = data
                .pread_with(base + 8, scroll::LE)
                .map_err(|_| PeLayoutError::TruncatedHeader(base + 8))?;
            let virtual_address: u32 = data
                .pread_with(base + 12, scroll::LE)
                .map_err(|_| PeLayoutError::TruncatedHeader(base + 12))?;
            let size_of_raw_data: u32 = data
                .pread_with(base + 16, scroll::LE)
                .map_err(|_| PeLayoutError::TruncatedHeader(base + 16))?;
            let pointer_to_raw_data: u32 = data
                .pread_with(base + 20, scroll::LE)
                .map_err(|_| PeLayoutError::TruncatedHeader(base + 20))?;
            sections.push(SectionRawInfo {
                virtual_address,
                virtual_size,
                pointer_to_raw_data,
                size_of_raw_data,
            });
        }

        Ok(Self {
            nt_header_offset,
            is_pe32_plus,
            checksum_field_offset,
            security_dir_offset,
            security_dir: SecurityDirectory {
                file_offset: sec_file_offset,
                size: sec_size,
            },
            base_relocation_dir: DataDirectory {
                virtual_address: reloc_va,
                size: reloc_size,
            },
            size_of_headers,
            sections,
        })
    }

    /// `SizeOfHeaders + sum(SizeOfRawData) + SecurityDirectory.size` — the
    /// total on-disk size per §4.2, used to strip trailing padding from a
    /// `DataSectionObject` buffer.
    pub fn total_on_disk_size(&self) -> u64 {
        let sections: u64 = self
            .sections
            .iter()
            .map(|s| u64::from(s.size_of_raw_data))
            .sum();
        u64::from(self.size_of_headers) + sections + u64::from(self.security_dir.size)
    }

    /// Absolute offset, in the buffer, of `OptionalHeader.ImageBase`.
    ///
    /// `ImageBase` sits at a different relative offset in the two layouts:
    /// the 32-bit optional header has a 4-byte `BaseOfData` field
    /// immediately before it that the 64-bit layout drops.
    pub fn image_base_offset(&self) -> usize {
        self.nt_header_offset as usize + if self.is_pe32_plus { 0x30 } else { 0x34 }
    }

    /// Translates an RVA to the offset the same byte lives at in a
    /// file-offset-shaped buffer (headers plus each section's raw data back
    /// to back, the §4.2 on-disk layout), the way `pefile.get_offset_from_rva`
    /// does: find the section whose mapped range contains `rva` and add it to
    /// that section's `PointerToRawData`. An RVA inside the headers (before
    /// the first section) maps to itself, since headers sit at the same
    /// offset on disk and in memory; so does any RVA no section claims.
    pub fn rva_to_file_offset(&self, rva: u32) -> u32 {
        for section in &self.sections {
            let mapped_size = if section.virtual_size != 0 {
                section.virtual_size
            } else {
                section.size_of_raw_data
            };
            let end = section.virtual_address.saturating_add(mapped_size);
            if rva >= section.virtual_address && rva < end {
                return section.pointer_to_raw_data + (rva - section.virtual_address);
            }
        }
        rva
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::synth_pe;

    #[test]
    fn parses_minimal_pe32_layout() {
        let pe = synth_pe::build(synth_pe::Options::default());
        let layout = PeLayout::parse(&pe).expect("valid PE");
        assert!(!layout.is_pe32_plus);
        assert_eq!(layout.checksum_field_offset, layout.nt_header_offset + 0x58);
        assert_eq!(
            layout.security_dir_offset,
            layout.nt_header_offset + 0x98
        );
    }

    #[test]
    fn parses_minimal_pe32_plus_layout() {
        let opts = synth_pe::Options {
            is_64: true,
            ..Default::default()
        };
        let pe = synth_pe::build(opts);
        let layout = PeLayout::parse(&pe).expect("valid PE");
        assert!(layout.is_pe32_plus);
        assert_eq!(layout.checksum_field_offset, layout.nt_header_offset + 0x58);
        assert_eq!(
            layout.security_dir_offset,
            layout.nt_header_offset + 0xa8
        );
    }

    #[test]
    fn rejects_corrupt_mz_signature() {
        let mut pe = synth_pe::build(synth_pe::Options::default());
        pe[0] = 0x4d;
        pe[1] = 0x5b; // corrupt, per spec.md end-to-end scenario 6
        assert_eq!(
            PeLayout::parse(&pe).unwrap_err(),
            PeLayoutError::MissingMzSignature
        );
    }

    #[test]
    fn total_on_disk_size_matches_headers_plus_sections_plus_security() {
        let pe = synth_pe::build(synth_pe::Options::default());
        let layout = PeLayout::parse(&pe).unwrap();
        let expected = u64::from(layout.size_of_headers)
            + layout
                .sections
                .iter()
                .map(|s| u64::from(s.size_of_raw_data))
                .sum::<u64>()
            + u64::from(layout.security_dir.size);
        assert_eq!(layout.total_on_disk_size(), expected);
    }

    #[test]
    fn rva_to_file_offset_translates_through_the_section_table() {
        let opts = synth_pe::Options {
            section_rva_delta: 0x4000,
            relocations: vec![synth_pe::Reloc::HighLow {
                section_relative_offset: 0x10,
            }],
            ..Default::default()
        };
        let pe = synth_pe::build(opts);
        let layout = PeLayout::parse(&pe).unwrap();

        let section = layout.sections[0];
        assert_eq!(
            layout.rva_to_file_offset(section.virtual_address + 0x10),
            section.pointer_to_raw_data + 0x10
        );
    }

    #[test]
    fn rva_to_file_offset_is_identity_for_an_rva_no_section_claims() {
        let pe = synth_pe::build(synth_pe::Options::default());
        let layout = PeLayout::parse(&pe).unwrap();
        assert_eq!(layout.rva_to_file_offset(4), 4);
    }
}
