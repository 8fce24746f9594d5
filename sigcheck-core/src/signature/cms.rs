// SPDX-License-Identifier: MIT OR Apache-2.0
//! The CMS Verifier (§4.6): checks a PKCS#7/CMS `SignedData` blob (the
//! payload of a `WIN_CERTIFICATE`, or a `.cat` catalog's own signature)
//! against a directory of trusted CA certificates.
//!
//! Trust store *construction* is out of scope here — callers hand us a
//! directory of already-vetted certificates (PEM or DER) and we load them
//! as-is. This mirrors running `openssl smime -verify -CApath ...`, except
//! through the native `openssl` bindings instead of a subprocess.

use std::fs;
use std::path::Path;

use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::X509;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CmsError {
    #[error("openssl error: {0}")]
    Openssl(#[from] openssl::error::ErrorStack),
    #[error("failed to read CA directory {0}: {1}")]
    CaDirUnreadable(std::path::PathBuf, std::io::Error),
    #[error("CA directory {0} contains no usable certificates")]
    EmptyCaStore(std::path::PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmsOutcome {
    /// `true` if the signature is cryptographically valid and chains to a
    /// certificate in the supplied CA store.
    pub trusted: bool,
    /// Human-readable verdict, normalized to a capitalized sentence (§4.6,
    /// §9: "surfaced verbatim (with first-letter capitalization)"),
    /// mirroring what `openssl smime -verify` prints to stderr.
    pub message: String,
}

/// Loads every PEM or DER certificate directly under `ca_dir` into an
/// [`X509Store`]. Non-certificate files are skipped rather than treated as
/// errors, since a CA directory frequently also holds CRLs or readme files.
fn build_store(ca_dir: &Path) -> Result<X509Store, CmsError> {
    let mut builder = X509StoreBuilder::new()?;
    let mut loaded = 0usize;

    let entries = fs::read_dir(ca_dir)
        .map_err(|e| CmsError::CaDirUnreadable(ca_dir.to_path_buf(), e))?;
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let bytes = match fs::read(entry.path()) {
            Ok(b) => b,
            Err(_) => continue,
        };
        let cert = X509::from_pem(&bytes).or_else(|_| X509::from_der(&bytes));
        if let Ok(cert) = cert {
            builder.add_cert(cert)?;
            loaded += 1;
        }
    }

    if loaded == 0 {
        return Err(CmsError::EmptyCaStore(ca_dir.to_path_buf()));
    }
    Ok(builder.build())
}

/// Verifies a DER-encoded PKCS#7 `SignedData` blob, which for Authenticode
/// is never detached: the signed content (`SpcIndirectDataContent`) travels
/// inside the structure itself, so `indata` is always `None`.
pub fn verify_signed_data(signed_data_der: &[u8], ca_dir: &Path) -> Result<CmsOutcome, CmsError> {
    let store = build_store(ca_dir)?;
    let pkcs7 = Pkcs7::from_der(signed_data_der)?;
    let certs = Stack::new()?;

    let mut out = Vec::new();
    let trusted = pkcs7
        .verify(&certs, &store, None, Some(&mut out), Pkcs7Flags::empty())
        .is_ok();
    let message = if trusted {
        "Verification successful".to_string()
    } else {
        "Verification failure".to_string()
    };

    Ok(CmsOutcome { trusted, message })
}

/// `SPC_PE_IMAGE_DATA_OBJID`, DER-encoded: `1.3.6.1.4.1.311.2.1.15`.
const SPC_PE_IMAGE_DATA_OID: &[u8] = &[
    0x06, 0x09, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x0f,
];

/// Decodes a DER length octet sequence starting at `data[pos]`. Returns
/// `(header_len, value_len)`: `header_len` includes the length octets
/// themselves, `value_len` is the encoded content length. Only definite-form
/// lengths are handled — indefinite-form BER is not something Authenticode
/// structures use.
fn read_der_length(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    let first = *data.get(pos)?;
    if first & 0x80 == 0 {
        return Some((1, first as usize));
    }
    let num_bytes = (first & 0x7f) as usize;
    if num_bytes == 0 || num_bytes > 4 {
        return None; // indefinite form or implausibly large — not expected here
    }
    let bytes = data.get(pos + 1..pos + 1 + num_bytes)?;
    let mut len = 0usize;
    for b in bytes {
        len = (len << 8) | *b as usize;
    }
    Some((1 + num_bytes, len))
}

/// Locates the `content` field of the `ContentInfo` wrapping
/// `SpcIndirectDataContent` inside a `WIN_CERTIFICATE` blob, by finding the
/// `SPC_PE_IMAGE_DATA_OBJID` OID and decoding the `[0] EXPLICIT` tag that
/// follows its enclosing `contentType`.
///
/// Returns `(content_offset, header_length, length)` of the inner content,
/// i.e. the bytes at `data[content_offset..content_offset+length]` are the
/// `SpcIndirectDataContent` payload, with the tag+length octets occupying
/// `header_length` bytes immediately before it. This is not load-bearing
/// for [`verify_signed_data`] — `openssl` consumes the outer DER directly —
/// but is kept so the content boundary can be inspected or hashed
/// independently, matching how the original tooling reported it.
pub fn locate_spc_pe_image_data(der: &[u8]) -> Option<(usize, usize, usize)> {
    let oid_pos = der
        .windows(SPC_PE_IMAGE_DATA_OID.len())
        .position(|w| w == SPC_PE_IMAGE_DATA_OID)?;

    // The content-type OID sits inside SpcAttributeTypeAndOptionalValue,
    // itself inside a ContentInfo SEQUENCE. The explicit [0] content tag
    // directly follows the OID bytes.
    let tag_pos = oid_pos + SPC_PE_IMAGE_DATA_OID.len();
    let tag = *der.get(tag_pos)?;
    if tag != 0xa0 {
        return None;
    }
    let (header_len, value_len) = read_der_length(der, tag_pos + 1)?;
    let content_offset = tag_pos + 1 + header_len;
    if content_offset + value_len > der.len() {
        return None;
    }
    Some((content_offset, header_len, value_len))
}
