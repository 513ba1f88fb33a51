/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Payload signature verification. The signature blob embedded in the
//! payload is a `Signatures` protobuf whose entries are PKCS#1 v1.5
//! signatures over the SHA-256 digest of the payload prefix.

use std::{fs, io, path::Path};

use rsa::{pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

use crate::{protobuf::delta_update::Signatures, util};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Signature blob contains no usable signatures")]
    NoSignatures,
    #[error("Failed to load public key")]
    LoadKeySpki(#[source] rsa::pkcs8::spki::Error),
    #[error("Failed to load PKCS#1 public key")]
    LoadKeyPkcs1(#[source] rsa::pkcs1::Error),
    #[error("Failed to parse signature blob")]
    Protobuf(#[from] quick_protobuf::Error),
    #[error("RSA error")]
    Rsa(#[from] rsa::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Load a PEM-encoded RSA public key. Accepts both SPKI (`BEGIN PUBLIC KEY`)
/// and PKCS#1 (`BEGIN RSA PUBLIC KEY`) encodings.
pub fn read_pem_public_key(path: &Path) -> Result<RsaPublicKey> {
    let data = fs::read_to_string(path)?;

    if data.contains("BEGIN RSA PUBLIC KEY") {
        RsaPublicKey::from_pkcs1_pem(&data).map_err(Error::LoadKeyPkcs1)
    } else {
        RsaPublicKey::from_public_key_pem(&data).map_err(Error::LoadKeySpki)
    }
}

/// Verify a `Signatures` blob against `digest` using `key`. Succeeds if any
/// contained signature verifies.
pub fn verify_signature(signatures_raw: &[u8], digest: &[u8], key: &RsaPublicKey) -> Result<()> {
    let signatures: Signatures = util::read_protobuf(signatures_raw)?;
    let mut last_error = None;

    for signature in &signatures.signatures {
        let Some(data) = &signature.data else {
            continue;
        };

        let scheme = Pkcs1v15Sign::new::<Sha256>();
        match key.verify(scheme, digest, data) {
            Ok(()) => return Ok(()),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.map_or(Error::NoSignatures, Error::Rsa))
}
