// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Signature Extractor (§4.5): finds `SpcIndirectDataContent.messageDigest`
//! inside a `WIN_CERTIFICATE` blob by byte pattern rather than a full ASN.1
//! parse.
//!
//! Pattern: `30 .. 30 .. 06 LEN OID(5..9) 05 00 04 HASH_SIZE`, followed
//! immediately by `HASH_SIZE` bytes of digest. This deliberately is not a
//! DER parser (see Design Notes): the two leading SEQUENCE tags plus an
//! OBJECT IDENTIFIER distinguishing the three supported digest algorithms
//! is enough to locate the digest without walking the rest of the
//! structure.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::pe::DigestAlgorithm;

const OID_MD5: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x02, 0x05];
const OID_SHA1: &[u8] = &[0x2b, 0x0e, 0x03, 0x02, 0x1a];
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];

/// `CERTIFICATE_REGEX` from the source plugin, shared by the Signature
/// Extractor (§4.5) and the Catalog Index (§4.7).
pub(crate) static CERTIFICATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s-u)\x30.\x30.\x06(?P<oid_len>.)(?P<oid>.{5,9})\x05\x00\x04(?P<hash_size>.)")
        .expect("static regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDigest {
    pub algorithm: DigestAlgorithm,
    pub expected_digest: Vec<u8>,
}

/// Scans `cert_blob` (the raw `WIN_CERTIFICATE` payload) for the digest
/// pattern. `None` means the certificate is present but unparseable by this
/// pattern (§4.5: "partial certificate").
pub fn extract_digest(cert_blob: &[u8]) -> Option<ExtractedDigest> {
    let caps = CERTIFICATE_REGEX.captures(cert_blob)?;
    let oid = caps.name("oid")?.as_bytes();
    let hash_size = *caps.name("hash_size")?.as_bytes().first()? as usize;

    let algorithm = if oid == OID_MD5 {
        DigestAlgorithm::Md5
    } else if oid == OID_SHA1 {
        DigestAlgorithm::Sha1
    } else if oid == OID_SHA256 {
        DigestAlgorithm::Sha256
    } else {
        return None;
    };

    if hash_size != algorithm.output_len() {
        return None;
    }

    let whole = caps.get(0)?;
    let start = whole.end();
    let digest = cert_blob.get(start..start + hash_size)?.to_vec();

    Some(ExtractedDigest {
        algorithm,
        expected_digest: digest,
    })
}

/// Builds a synthetic `30 .. 30 .. 06 LEN OID 05 00 04 LEN <digest>` blob,
/// the shape [`extract_digest`] and the Catalog Index look for. Used by
/// tests and by fixture generation; not part of the parsed-signature path.
#[cfg(test)]
pub(crate) fn encode_digest_pattern(algorithm: DigestAlgorithm, digest: &[u8]) -> Vec<u8> {
    let oid = match algorithm {
        DigestAlgorithm::Md5 => OID_MD5,
        DigestAlgorithm::Sha1 => OID_SHA1,
        DigestAlgorithm::Sha256 => OID_SHA256,
    };
    let mut out = Vec::new();
    // Two arbitrary-length-byte SEQUENCE tags; the pattern only checks the
    // tag + one length byte, not the nested structure.
    out.extend_from_slice(&[0x30, 0x00, 0x30, 0x00]);
    out.push(0x06);
    out.push(oid.len() as u8);
    out.extend_from_slice(oid);
    out.extend_from_slice(&[0x05, 0x00, 0x04]);
    out.push(digest.len() as u8);
    out.extend_from_slice(digest);
    out
}
