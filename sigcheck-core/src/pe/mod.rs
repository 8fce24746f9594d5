// SPDX-License-Identifier: MIT OR Apache-2.0
//! PE/COFF reconstruction and Authenticode hashing.

pub mod checksum;
pub mod hash;
pub mod layout;
pub mod reloc;

pub use hash::{authenticode_digest, DigestAlgorithm};
pub use layout::{DataDirectory, PeLayout, PeLayoutError, SecurityDirectory};
pub use reloc::{rebase, RelocationError};
