// SPDX-License-Identifier: MIT OR Apache-2.0
//! Embedded-signature extraction (§4.5) and CMS/PKCS#7 verification (§4.6).

pub mod cms;
pub mod extractor;

pub use cms::{verify_signed_data, CmsError, CmsOutcome};
pub use extractor::{extract_digest, ExtractedDigest};
