// SPDX-License-Identifier: MIT OR Apache-2.0
//! The classic Microsoft PE header checksum (`OptionalHeader.CheckSum`),
//! as computed by `CheckSumMappedFile` / `IMAGEHLP!MapFileAndCheckSumW`.
//!
//! This is *not* the Authenticode digest (see [`crate::pe::hash`]) — it's a
//! much weaker, non-cryptographic checksum the loader itself tolerates
//! being wrong. The Relocation Rebaser (§4.4) uses it only as a cheap
//! "does this buffer look like the original on-disk bytes at this
//! ImageBase" signal while trying candidate bases.

use scroll::Pread;

use crate::pe::layout::PeLayout;

/// Computes the checksum `data` *should* have, treating the 4 bytes at
/// `checksum_field_offset` as zero (the field does not include itself).
pub fn compute(data: &[u8], checksum_field_offset: u32) -> u32 {
    let checksum_field_offset = checksum_field_offset as usize;
    let mut sum: u64 = 0;
    let mut i = 0usize;
    while i + 4 <= data.len() {
        if i == checksum_field_offset {
            i += 4;
            continue;
        }
        let word: u32 = data.pread_with(i, scroll::LE).unwrap_or(0);
        sum += u64::from(word);
        sum = (sum & 0xffff_ffff) + (sum >> 32);
        i += 4;
    }
    // Trailing bytes shorter than a dword, zero-padded.
    if i < data.len() {
        let mut tail = [0u8; 4];
        tail[..data.len() - i].copy_from_slice(&data[i..]);
        let word = u32::from_le_bytes(tail);
        sum += u64::from(word);
        sum = (sum & 0xffff_ffff) + (sum >> 32);
    }

    let mut checksum = (sum & 0xffff) + (sum >> 16);
    checksum += checksum >> 16;
    checksum &= 0xffff;
    checksum += data.len() as u64;
    checksum as u32
}

/// True iff `data`'s stored `OptionalHeader.CheckSum` matches the value
/// [`compute`] derives for it.
pub fn verify(data: &[u8], layout: &PeLayout) -> bool {
    let stored: u32 = match data.pread_with(layout.checksum_field_offset as usize, scroll::LE) {
        Ok(v) => v,
        Err(_) => return false,
    };
    stored == compute(data, layout.checksum_field_offset)
}
