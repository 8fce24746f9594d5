// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Authenticode PE digest (§4.3): hash the whole file except the
//! `CheckSum` field, the Security directory entry itself, and the embedded
//! signature blob it points at.

use digest::Digest;
use md5::Md5;
use sha1::Sha1;
use sha2::Sha256;

use crate::pe::layout::PeLayout;

/// Digest algorithms an Authenticode signature may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 16,
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
        }
    }
}

/// Computes the Authenticode digest of `data` under `algorithm`, per the
/// exclusion algorithm in §4.3:
///
/// 1. hash `data[..checksum_field_offset]`
/// 2. skip the 4-byte `CheckSum`, hash up to `security_dir_offset`
/// 3. skip the 8-byte Security directory entry
/// 4. if a certificate is present, hash up to its start and resume after it;
///    otherwise hash to the end of the buffer.
pub fn authenticode_digest(data: &[u8], layout: &PeLayout, algorithm: DigestAlgorithm) -> Vec<u8> {
    match algorithm {
        DigestAlgorithm::Md5 => digest_with::<Md5>(data, layout),
        DigestAlgorithm::Sha1 => digest_with::<Sha1>(data, layout),
        DigestAlgorithm::Sha256 => digest_with::<Sha256>(data, layout),
    }
}

fn digest_with<D: Digest>(data: &[u8], layout: &PeLayout) -> Vec<u8> {
    let mut hasher = D::new();

    let checksum_off = layout.checksum_field_offset as usize;
    let security_off = layout.security_dir_offset as usize;

    hasher.update(&data[..checksum_off.min(data.len())]);

    let after_checksum = (checksum_off + 4).min(data.len());
    let before_security = security_off.min(data.len());
    if after_checksum < before_security {
        hasher.update(&data[after_checksum..before_security]);
    }

    let after_security_entry = (security_off + 8).min(data.len());

    if layout.security_dir.is_present() {
        let cert_start = (layout.security_dir.file_offset as usize).min(data.len());
        let cert_end = (layout.security_dir.file_offset as usize
            + layout.security_dir.size as usize)
            .min(data.len());

        if after_security_entry < cert_start {
            hasher.update(&data[after_security_entry..cert_start]);
        }
        if cert_end < data.len() {
            hasher.update(&data[cert_end..]);
        }
    } else if after_security_entry < data.len() {
        hasher.update(&data[after_security_entry..]);
    }

    hasher.finalize().to_vec()
}
