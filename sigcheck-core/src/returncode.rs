// SPDX-License-Identifier: MIT OR Apache-2.0
//! The closed set of per-module verdicts produced by the validation
//! orchestrator (§6/§8 of the design: every module yields exactly one of
//! these).

use std::fmt;

/// Verdict for a single module's Authenticode validation.
///
/// Numeric values match the original plugin's exit-code table so that
/// downstream tooling expecting those codes keeps working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCode {
    FileObjectError,
    PeRebuiltFailed,
    PeChecksumMismatch,
    PartialContentPeDataError,
    SignedFileNotVerified,
    ContentSignedNotVerified,
    PartialContentMaybeCatalogSigned,
    PartialContentNotSigned,
    AuthenticodeSignatureMismatchOrIncorrectImagebase,
    AuthenticodeSignatureMismatch,
    CatalogSigned,
    MaybeCatalogSigned,
    NotSignedOrIncorrectImagebase,
    NotSigned,
    NotPeb,
    AlreadyTerminated,
    PartialCertificate,
    PartialContentVerified,
}

impl ReturnCode {
    /// Stable numeric code, matching the source plugin's enumeration.
    pub fn code(self) -> u8 {
        use ReturnCode::*;
        match self {
            FileObjectError => 1,
            PeRebuiltFailed => 2,
            PeChecksumMismatch => 3,
            PartialContentPeDataError => 4,
            SignedFileNotVerified => 5,
            ContentSignedNotVerified => 6,
            PartialContentMaybeCatalogSigned => 7,
            PartialContentNotSigned => 8,
            AuthenticodeSignatureMismatchOrIncorrectImagebase => 9,
            AuthenticodeSignatureMismatch => 10,
            CatalogSigned => 11,
            MaybeCatalogSigned => 12,
            NotSignedOrIncorrectImagebase => 13,
            NotSigned => 14,
            NotPeb => 15,
            AlreadyTerminated => 16,
            PartialCertificate => 17,
            PartialContentVerified => 18,
        }
    }

    /// Human-readable message, as presented in table/JSON output.
    pub fn message(self) -> &'static str {
        use ReturnCode::*;
        match self {
            FileObjectError => "Unable to read FileObject",
            PeRebuiltFailed => "Unable to rebuild PE file",
            PeChecksumMismatch => "PE OptionalHeader.CheckSum mismatch",
            PartialContentPeDataError => "Partial file content. Unable to load PE",
            SignedFileNotVerified => "Signed file, but not verified",
            ContentSignedNotVerified => "Partial file content. Signed file, but not verified",
            PartialContentMaybeCatalogSigned => {
                "Partial file content. Not signed file (maybe catalog-signed?)"
            }
            PartialContentNotSigned => "Partial file content. Not signed file",
            AuthenticodeSignatureMismatchOrIncorrectImagebase => {
                "Certificate's hash mismatch calculated hash, or incorrect ImageBase during reconstruction"
            }
            AuthenticodeSignatureMismatch => "Certificate's hash mismatch calculated hash",
            CatalogSigned => "Verification successful (catalog-signed)",
            MaybeCatalogSigned => "Not signed file (maybe catalog-signed?)",
            NotSignedOrIncorrectImagebase => {
                "Not signed file, or incorrect ImageBase during reconstruction"
            }
            NotSigned => "Not signed file",
            NotPeb => "Unable to read PEB",
            AlreadyTerminated => "Already terminated",
            PartialCertificate => "Embedded certificate incomplete",
            PartialContentVerified => "Partial file content. Unable to compare file hash and signature hash",
        }
    }

    /// True for verdicts that represent a successfully verified signature.
    pub fn is_success(self) -> bool {
        matches!(self, ReturnCode::CatalogSigned)
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_original_enumeration() {
        assert_eq!(ReturnCode::FileObjectError.code(), 1);
        assert_eq!(ReturnCode::CatalogSigned.code(), 11);
        assert_eq!(ReturnCode::PartialContentVerified.code(), 18);
    }

    #[test]
    fn catalog_signed_is_the_only_bare_success() {
        assert!(ReturnCode::CatalogSigned.is_success());
        assert!(!ReturnCode::NotSigned.is_success());
        assert!(!ReturnCode::SignedFileNotVerified.is_success());
    }
}
