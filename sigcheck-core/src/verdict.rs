// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-module outcome the orchestrator yields (§4.8, §8 scenario 1).
//!
//! Most outcomes are one of the 18 closed [`ReturnCode`] variants, but a
//! successfully verified embedded signature is not: the original plugin
//! this was derived from returns the CMS verifier's own human-readable
//! verdict string in that case, not a member of its `ReturnCode` enum.
//! `ModuleVerdict` models that directly instead of inventing a 19th
//! `ReturnCode` the spec never names.

use std::fmt;

use crate::returncode::ReturnCode;

/// One module's final Authenticode validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleVerdict {
    /// A terminal outcome drawn from the closed `ReturnCode` enumeration.
    Code(ReturnCode),
    /// An embedded signature whose digest matched and whose CMS
    /// verification succeeded: the verifier's own verdict string, surfaced
    /// verbatim (§4.6, §9 "External CMS verifier").
    Verified(String),
    /// `PARTIAL_CONTENT_VERIFIED` (18), with the CMS verifier's verdict
    /// appended (§4.8 `VALIDATE_PARTIAL`, §8 scenario 4): the code is fixed
    /// at 18 regardless of whether verification actually succeeded, only
    /// the detail text varies.
    CodeWithDetail(ReturnCode, String),
}

impl ModuleVerdict {
    /// Numeric exit code (spec.md §6), or `None` for a bare verified-signature
    /// string that was never assigned one of the 18 codes.
    pub fn numeric_code(&self) -> Option<u8> {
        match self {
            ModuleVerdict::Code(c) => Some(c.code()),
            ModuleVerdict::Verified(_) => None,
            ModuleVerdict::CodeWithDetail(c, _) => Some(c.code()),
        }
    }

    /// Human-readable message, as rendered in table/JSON output.
    pub fn message(&self) -> String {
        match self {
            ModuleVerdict::Code(c) => c.message().to_string(),
            ModuleVerdict::Verified(msg) => msg.clone(),
            ModuleVerdict::CodeWithDetail(c, detail) => {
                format!("{}. Signature verification: {}", c.message(), detail)
            }
        }
    }

    /// True for outcomes that represent a successfully verified signature,
    /// whether catalog-based (`CatalogSigned`) or an embedded signature the
    /// CMS verifier trusted.
    pub fn is_success(&self) -> bool {
        match self {
            ModuleVerdict::Code(c) => c.is_success(),
            ModuleVerdict::Verified(_) => true,
            ModuleVerdict::CodeWithDetail(..) => false,
        }
    }
}

impl fmt::Display for ModuleVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl From<ReturnCode> for ModuleVerdict {
    fn from(code: ReturnCode) -> Self {
        ModuleVerdict::Code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_signature_has_no_numeric_code() {
        let v = ModuleVerdict::Verified("Verification successful".into());
        assert_eq!(v.numeric_code(), None);
        assert!(v.is_success());
    }

    #[test]
    fn code_with_detail_keeps_the_fixed_code_and_appends_detail() {
        let v = ModuleVerdict::CodeWithDetail(
            ReturnCode::PartialContentVerified,
            "Verification successful".into(),
        );
        assert_eq!(v.numeric_code(), Some(18));
        assert_eq!(
            v.message(),
            "Partial file content. Unable to compare file hash and signature hash. \
             Signature verification: Verification successful"
        );
    }

    #[test]
    fn bare_code_delegates_to_return_code_message() {
        let v = ModuleVerdict::Code(ReturnCode::NotSigned);
        assert_eq!(v.message(), ReturnCode::NotSigned.message());
        assert!(!v.is_success());
    }
}
