// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Relocation Rebaser (§4.4): undoes base relocations applied when an
//! `ImageSectionObject` was mapped at an in-memory `ImageBase` different
//! from the one it was compiled/linked for, so the buffer matches its
//! on-disk form (and its embedded Authenticode hash once again verifies).
//!
//! The buffer this operates on is file-offset-shaped, the same as every
//! other consumer in this crate (`PeLayout`'s own section reads, the
//! Authenticode hasher's Security-directory exclusion): it has already been
//! trimmed to its on-disk size before reaching here. Relocation entries,
//! though, are expressed as RVAs — both the base relocation directory's own
//! `virtual_address` and each entry's `page_rva + page_offset` — so they're
//! translated through the section table via [`PeLayout::rva_to_file_offset`]
//! before being used to index the buffer.

use scroll::{Pread, Pwrite};
use thiserror::Error;

use crate::pe::layout::PeLayout;

const IMAGE_REL_BASED_ABSOLUTE: u8 = 0;
const IMAGE_REL_BASED_HIGHLOW: u8 = 3;
const IMAGE_REL_BASED_DIR64: u8 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelocationError {
    #[error("image has no base relocation table")]
    MissingRelocationTable,
    #[error("malformed base relocation block at offset {0:#x}")]
    MalformedBlock(usize),
    #[error("relocation entry targets offset {0:#x}, outside the buffer")]
    EntryOutOfBounds(usize),
}

/// Applies base relocations to rewrite `data` as if it had been mapped at
/// `new_base` instead of `old_base`, and patches `OptionalHeader.ImageBase`
/// to `new_base`. Returns the rewritten buffer; `data` is left untouched.
pub fn rebase(
    data: &[u8],
    layout: &PeLayout,
    old_base: u64,
    new_base: u64,
) -> Result<Vec<u8>, RelocationError> {
    if !layout.base_relocation_dir.is_present() {
        return Err(RelocationError::MissingRelocationTable);
    }

    let mut out = data.to_vec();
    let delta = new_base.wrapping_sub(old_base);

    let table_start = layout.rva_to_file_offset(layout.base_relocation_dir.virtual_address) as usize;
    let table_size = layout.base_relocation_dir.size as usize;
    let table_end = table_start
        .checked_add(table_size)
        .ok_or(RelocationError::MalformedBlock(table_start))?;
    if table_end > out.len() {
        return Err(RelocationError::MalformedBlock(table_start));
    }

    let mut cursor = table_start;
    while cursor < table_end {
        let page_rva: u32 = out
            .pread_with(cursor, scroll::LE)
            .map_err(|_| RelocationError::MalformedBlock(cursor))?;
        let block_size: u32 = out
            .pread_with(cursor + 4, scroll::LE)
            .map_err(|_| RelocationError::MalformedBlock(cursor))?;

        if block_size < 8 || cursor + block_size as usize > table_end {
            return Err(RelocationError::MalformedBlock(cursor));
        }

        let entry_count = (block_size as usize - 8) / 2;
        for i in 0..entry_count {
            let entry_off = cursor + 8 + i * 2;
            let entry: u16 = out
                .pread_with(entry_off, scroll::LE)
                .map_err(|_| RelocationError::MalformedBlock(entry_off))?;
            let kind = (entry >> 12) as u8;
            let page_offset = entry & 0x0fff;
            let target_rva = page_rva + page_offset as u32;
            let target = layout.rva_to_file_offset(target_rva) as usize;

            match kind {
                IMAGE_REL_BASED_ABSOLUTE => continue,
                IMAGE_REL_BASED_HIGHLOW => {
                    let value: u32 = out
                        .pread_with(target, scroll::LE)
                        .map_err(|_| RelocationError::EntryOutOfBounds(target))?;
                    let patched = value.wrapping_add(delta as u32);
                    out.pwrite_with(patched, target, scroll::LE)
                        .map_err(|_| RelocationError::EntryOutOfBounds(target))?;
                }
                IMAGE_REL_BASED_DIR64 => {
                    let value: u64 = out
                        .pread_with(target, scroll::LE)
                        .map_err(|_| RelocationError::EntryOutOfBounds(target))?;
                    let patched = value.wrapping_add(delta as u64);
                    out.pwrite_with(patched, target, scroll::LE)
                        .map_err(|_| RelocationError::EntryOutOfBounds(target))?;
                }
                _ => {
                    // Unhandled relocation type (e.g. HIGH/LOW split,
                    // MIPS/ARM-specific types): conservatively fail this
                    // candidate rather than silently producing a
                    // half-patched image.
                    return Err(RelocationError::MalformedBlock(entry_off));
                }
            }
        }

        cursor += block_size as usize;
    }

    let image_base_off = layout.image_base_offset();
    if layout.is_pe32_plus {
        out.pwrite_with(new_base, image_base_off, scroll::LE)
            .map_err(|_| RelocationError::EntryOutOfBounds(image_base_off))?;
    } else {
        out.pwrite_with(new_base as u32, image_base_off, scroll::LE)
            .map_err(|_| RelocationError::EntryOutOfBounds(image_base_off))?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::checksum;
    use crate::pe::layout::PeLayout;
    use crate::test_support::synth_pe;

    #[test]
    fn missing_relocation_table_is_reported() {
        let pe = synth_pe::build(synth_pe::Options::default());
        let layout = PeLayout::parse(&pe).unwrap();
        assert_eq!(
            rebase(&pe, &layout, 0x1000_0000, 0x2000_0000).unwrap_err(),
            RelocationError::MissingRelocationTable
        );
    }

    #[test]
    fn round_trip_rebase_restores_original_bytes_and_hash() {
        // Invariant 2 (§8): rebasing b1 -> b2 -> b1 reproduces the original
        // Authenticode hash.
        let old_base: u64 = 0x1400_0000;
        let opts = synth_pe::Options {
            image_base: old_base,
            relocations: vec![synth_pe::Reloc::HighLow {
                section_relative_offset: 0x10,
            }],
            ..Default::default()
        };
        let pe = synth_pe::build(opts);
        let layout = PeLayout::parse(&pe).unwrap();

        let new_base = 0x1800_0000u64;
        let rebased = rebase(&pe, &layout, old_base, new_base).unwrap();
        let layout_rebased = PeLayout::parse(&rebased).unwrap();
        let restored = rebase(&rebased, &layout_rebased, new_base, old_base).unwrap();

        assert_eq!(restored, pe);

        let layout_restored = PeLayout::parse(&restored).unwrap();
        assert_eq!(
            checksum::compute(&restored, layout_restored.checksum_field_offset),
            checksum::compute(&pe, layout.checksum_field_offset)
        );
    }

    #[test]
    fn rebase_patches_the_relocated_dword_by_delta() {
        let old_base: u64 = 0x1000_0000;
        let opts = synth_pe::Options {
            image_base: old_base,
            relocations: vec![synth_pe::Reloc::HighLow {
                section_relative_offset: 0x10,
            }],
            ..Default::default()
        };
        let mut pe = synth_pe::build(opts);
        let layout = PeLayout::parse(&pe).unwrap();
        let target_off = layout.sections[0].pointer_to_raw_data as usize + 0x10;
        let original_value: u32 = 0x1000_1234;
        pe[target_off..target_off + 4].copy_from_slice(&original_value.to_le_bytes());
        let layout = PeLayout::parse(&pe).unwrap();

        let new_base = 0x2000_0000u64;
        let rebased = rebase(&pe, &layout, old_base, new_base).unwrap();

        let patched: u32 = rebased.pread_with(target_off, scroll::LE).unwrap();
        assert_eq!(patched, original_value.wrapping_add(0x1000_0000));
    }

    #[test]
    fn rebase_translates_rva_to_file_offset_when_they_diverge() {
        // VirtualAddress != PointerToRawData here, unlike every other test
        // in this file: this is what actually exercises the section-table
        // translation instead of accidentally passing because the two
        // happen to collapse.
        let old_base: u64 = 0x1000_0000;
        let opts = synth_pe::Options {
            image_base: old_base,
            relocations: vec![synth_pe::Reloc::HighLow {
                section_relative_offset: 0x10,
            }],
            section_rva_delta: 0x4000,
            ..Default::default()
        };
        let mut pe = synth_pe::build(opts);
        let layout = PeLayout::parse(&pe).unwrap();
        assert_ne!(
            layout.sections[0].virtual_address,
            layout.sections[0].pointer_to_raw_data
        );
        let target_off = layout.sections[0].pointer_to_raw_data as usize + 0x10;
        let original_value: u32 = 0x1000_1234;
        pe[target_off..target_off + 4].copy_from_slice(&original_value.to_le_bytes());
        let layout = PeLayout::parse(&pe).unwrap();

        let new_base = 0x2000_0000u64;
        let rebased = rebase(&pe, &layout, old_base, new_base).unwrap();

        let patched: u32 = rebased.pread_with(target_off, scroll::LE).unwrap();
        assert_eq!(patched, original_value.wrapping_add(0x1000_0000));
    }
}
