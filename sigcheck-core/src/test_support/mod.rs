// SPDX-License-Identifier: MIT OR Apache-2.0
//! Synthetic PE buffer construction and CMS signing fixtures for unit
//! tests. Not part of the public API; only compiled under `#[cfg(test)]`.

pub mod cms_fixture;
pub mod synth_pe;
