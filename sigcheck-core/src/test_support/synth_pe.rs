// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hand-assembled minimal PE32/PE32+ buffers for unit tests — just enough
//! structure (DOS stub, NT headers, one or more sections, an optional
//! `.reloc` section carrying a base relocation table, an optional trailing
//! certificate) to exercise the PE Layout Reader, Authenticode Hasher and
//! Relocation Rebaser without a real binary on disk. `section_rva_delta`
//! lets a test build sections whose `VirtualAddress` diverges from their
//! `PointerToRawData`, the way a real linked image's does.

const NT_OFF: usize = 0x80;
const NUM_DATA_DIRECTORIES: usize = 16;

/// One base relocation to bake into the synthetic `.reloc` table, expressed
/// relative to the start of `sections[0]`'s raw data.
#[derive(Debug, Clone, Copy)]
pub enum Reloc {
    HighLow { section_relative_offset: u32 },
    Dir64 { section_relative_offset: u32 },
}

#[derive(Debug, Clone)]
pub struct Options {
    pub is_64: bool,
    pub image_base: u64,
    pub sections: Vec<(&'static str, Vec<u8>)>,
    pub relocations: Vec<Reloc>,
    /// If set, a WIN_CERTIFICATE-shaped blob is appended after section data
    /// and the Security directory is pointed at it.
    pub cert_bytes: Option<Vec<u8>>,
    /// Constant added to every section's (and the synthetic `.reloc`
    /// section's) raw file offset to produce its `VirtualAddress`. Zero by
    /// default, which collapses RVA and file offset — most tests don't care.
    /// Set nonzero to build a PE where the two diverge, the way a real
    /// linked image does once `SectionAlignment != FileAlignment`.
    pub section_rva_delta: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            is_64: false,
            image_base: 0x0040_0000,
            sections: vec![(".text", vec![0u8; 256])],
            relocations: vec![],
            cert_bytes: None,
            section_rva_delta: 0,
        }
    }
}

/// Builds a minimal, internally-consistent PE buffer per `opts`. The
/// `OptionalHeader.CheckSum` field is left at zero (callers needing a
/// checksum-verifying buffer compute and patch it themselves via
/// [`crate::pe::checksum`]).
pub fn build(opts: Options) -> Vec<u8> {
    let opt_fixed_len: usize = if opts.is_64 { 0x70 } else { 0x60 };
    let size_opt_header = opt_fixed_len + NUM_DATA_DIRECTORIES * 8;
    let opt_off = NT_OFF + 24;
    let dirs_off = opt_off + opt_fixed_len;
    let section_table_off = opt_off + size_opt_header;
    let real_section_count = opts.sections.len().max(1);
    let has_reloc_section = !opts.relocations.is_empty();
    let num_sections = real_section_count + if has_reloc_section { 1 } else { 0 };
    let headers_end = section_table_off + num_sections * 40;
    let size_of_headers = align_up(headers_end, 0x200);

    let mut buf = vec![0u8; size_of_headers];
    buf[0..2].copy_from_slice(b"MZ");
    write_u32(&mut buf, 0x3c, NT_OFF as u32);
    buf[NT_OFF..NT_OFF + 4].copy_from_slice(b"PE\0\0");

    let machine: u16 = if opts.is_64 { 0x8664 } else { 0x014c };
    write_u16(&mut buf, NT_OFF + 4, machine);
    write_u16(&mut buf, NT_OFF + 6, num_sections as u16);
    write_u16(&mut buf, NT_OFF + 20, size_opt_header as u16);

    let magic: u16 = if opts.is_64 { 0x020b } else { 0x010b };
    write_u16(&mut buf, opt_off, magic);

    let image_base_off = NT_OFF + if opts.is_64 { 0x30 } else { 0x34 };
    if opts.is_64 {
        write_u64(&mut buf, image_base_off, opts.image_base);
    } else {
        write_u32(&mut buf, image_base_off, opts.image_base as u32);
    }

    write_u32(&mut buf, opt_off + 0x3c, size_of_headers as u32);
    // CheckSum at opt_off + 0x40 left zero.
    write_u32(&mut buf, dirs_off - 4, NUM_DATA_DIRECTORIES as u32);

    // Section headers, raw data appended after `size_of_headers`.
    let mut raw_offset = size_of_headers;
    let mut section_offsets = Vec::with_capacity(real_section_count);
    let sections = if opts.sections.is_empty() {
        vec![(".text", vec![0u8; 256])]
    } else {
        opts.sections.clone()
    };
    for (i, (name, data)) in sections.iter().enumerate() {
        let hdr = section_table_off + i * 40;
        let name_bytes = name.as_bytes();
        let n = name_bytes.len().min(8);
        buf[hdr..hdr + n].copy_from_slice(&name_bytes[..n]);
        let va = raw_offset as u32 + opts.section_rva_delta;
        write_u32(&mut buf, hdr + 8, data.len() as u32); // VirtualSize
        write_u32(&mut buf, hdr + 12, va); // VirtualAddress
        write_u32(&mut buf, hdr + 16, data.len() as u32); // SizeOfRawData
        write_u32(&mut buf, hdr + 20, raw_offset as u32); // PointerToRawData
        section_offsets.push(raw_offset);
        raw_offset += data.len();
    }
    buf.resize(raw_offset, 0);
    for ((_, data), &offset) in sections.iter().zip(section_offsets.iter()) {
        buf[offset..offset + data.len()].copy_from_slice(data);
    }

    if has_reloc_section {
        let reloc_table_off = buf.len();
        let first_section_va = section_offsets[0] as u32 + opts.section_rva_delta;
        let reloc_bytes = build_relocation_table(&opts.relocations, first_section_va as usize);
        buf.extend_from_slice(&reloc_bytes);

        let reloc_hdr = section_table_off + real_section_count * 40;
        let reloc_va = reloc_table_off as u32 + opts.section_rva_delta;
        buf[reloc_hdr..reloc_hdr + 6].copy_from_slice(b".reloc");
        write_u32(&mut buf, reloc_hdr + 8, reloc_bytes.len() as u32); // VirtualSize
        write_u32(&mut buf, reloc_hdr + 12, reloc_va); // VirtualAddress
        write_u32(&mut buf, reloc_hdr + 16, reloc_bytes.len() as u32); // SizeOfRawData
        write_u32(&mut buf, reloc_hdr + 20, reloc_table_off as u32); // PointerToRawData

        let reloc_entry_off = dirs_off + 5 * 8;
        write_u32(&mut buf, reloc_entry_off, reloc_va);
        write_u32(&mut buf, reloc_entry_off + 4, reloc_bytes.len() as u32);
    }

    if let Some(cert) = &opts.cert_bytes {
        let cert_off = buf.len();
        buf.extend_from_slice(cert);
        let security_entry_off = dirs_off + 4 * 8;
        write_u32(&mut buf, security_entry_off, cert_off as u32);
        write_u32(&mut buf, security_entry_off + 4, cert.len() as u32);
    }

    buf
}

fn build_relocation_table(relocations: &[Reloc], section_start: usize) -> Vec<u8> {
    use std::collections::BTreeMap;

    let mut by_page: BTreeMap<u32, Vec<(u16, u16)>> = BTreeMap::new();
    for reloc in relocations {
        let (rel, kind) = match *reloc {
            Reloc::HighLow {
                section_relative_offset,
            } => (section_relative_offset, 3u16),
            Reloc::Dir64 {
                section_relative_offset,
            } => (section_relative_offset, 10u16),
        };
        let absolute = section_start as u32 + rel;
        let page = absolute & !0xfff;
        let in_page = (absolute & 0xfff) as u16;
        by_page.entry(page).or_default().push((in_page, kind));
    }

    let mut out = Vec::new();
    for (page, entries) in by_page {
        let raw_len = 8 + entries.len() * 2;
        let block_size = align_up(raw_len, 4);
        out.extend_from_slice(&page.to_le_bytes());
        out.extend_from_slice(&(block_size as u32).to_le_bytes());
        for (offset, kind) in &entries {
            let word = (kind << 12) | offset;
            out.extend_from_slice(&word.to_le_bytes());
        }
        // Pad with IMAGE_REL_BASED_ABSOLUTE (type 0) entries so the block's
        // recorded size and its actual entry count agree.
        for _ in 0..(block_size - raw_len) / 2 {
            out.extend_from_slice(&0u16.to_le_bytes());
        }
    }
    out
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
