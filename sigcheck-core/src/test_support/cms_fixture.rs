// SPDX-License-Identifier: MIT OR Apache-2.0
//! Self-signed certificate and PKCS#7 `SignedData` construction, shared by
//! the CMS Verifier's own tests and the orchestrator's end-to-end tests
//! that need a real, verifiable embedded signature rather than a
//! hand-assembled digest pattern alone.

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::{X509Builder, X509NameBuilder, X509};

/// Builds a fresh self-signed certificate/key pair. Each call generates a
/// distinct key and serial, so two calls never produce certificates that
/// would accidentally chain to each other.
pub(crate) fn self_signed_cert(common_name: &str) -> (X509, PKey<Private>) {
    let rsa = Rsa::generate(2048).expect("rsa keygen");
    let pkey = PKey::from_rsa(rsa).expect("pkey from rsa");

    let mut name_builder = X509NameBuilder::new().expect("name builder");
    name_builder
        .append_entry_by_text("CN", common_name)
        .expect("append CN");
    let name = name_builder.build();

    let mut builder = X509Builder::new().expect("x509 builder");
    builder.set_version(2).expect("set version");
    builder.set_subject_name(&name).expect("set subject");
    builder.set_issuer_name(&name).expect("set issuer");
    builder.set_pubkey(&pkey).expect("set pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("not_before"))
        .expect("set not_before");
    builder
        .set_not_after(&Asn1Time::days_from_now(365).expect("not_after"))
        .expect("set not_after");
    let mut serial = BigNum::new().expect("bignum");
    serial
        .rand(64, MsbOption::MAYBE_ZERO, false)
        .expect("random serial");
    builder
        .set_serial_number(&serial.to_asn1_integer().expect("serial to asn1"))
        .expect("set serial");
    builder.sign(&pkey, MessageDigest::sha256()).expect("self-sign");

    (builder.build(), pkey)
}

/// Produces a DER-encoded PKCS#7 `SignedData` blob over `content`, signed
/// by `cert`/`pkey`, content embedded (never detached — Authenticode never
/// detaches `SpcIndirectDataContent`).
pub(crate) fn sign_content(cert: &X509, pkey: &PKey<Private>, content: &[u8]) -> Vec<u8> {
    let extra_certs = Stack::new().expect("empty cert stack");
    let pkcs7 = Pkcs7::sign(cert, pkey, &extra_certs, content, Pkcs7Flags::BINARY).expect("pkcs7 sign");
    pkcs7.to_der().expect("pkcs7 to der")
}
