// SPDX-License-Identifier: MIT OR Apache-2.0

//! EK fingerprint used to look up manufacturer certificates
//!
//! SHA-256 over the RSA modulus followed by the profile's fixed exponent
//! bytes, base64 encoded with the URL-safe alphabet and then percent-encoded
//! for use as a path segment.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use ektpm2::TpmAlg;
use sha2::{Digest, Sha256};

use crate::blob::PublicKeyBlob;
use crate::error::FingerprintError;
use crate::profile::v2;

/// Compute SHA256 hash of one or more byte slices
macro_rules! sha256 {
    ($($item:expr),+ $(,)?) => {{
        let mut hasher = Sha256::new();
        $(hasher.update($item);)+
        <[u8; 32]>::from(hasher.finalize())
    }};
}

/// Fingerprint of an EK public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    digest: [u8; 32],
    url_safe: String,
}

impl Fingerprint {
    /// Derive the fingerprint of an RSA EK
    ///
    /// Other key types have no agreed construction and are rejected.
    pub fn derive(blob: &PublicKeyBlob) -> Result<Self, FingerprintError> {
        let object_type = blob.area().object_type;
        if object_type != TpmAlg::Rsa {
            return Err(FingerprintError::UnsupportedKeyType(object_type.name()));
        }
        let modulus = blob
            .rsa_modulus()
            .filter(|modulus| !modulus.is_empty())
            .ok_or(FingerprintError::EmptyModulus)?;
        Ok(Self::from_modulus(modulus))
    }

    /// Fingerprint of raw RSA modulus bytes
    pub fn from_modulus(modulus: &[u8]) -> Self {
        Self::from_digest(sha256!(modulus, v2::EK_FINGERPRINT_EXPONENT))
    }

    fn from_digest(digest: [u8; 32]) -> Self {
        Self {
            digest,
            url_safe: URL_SAFE.encode(digest),
        }
    }

    /// Raw SHA-256 digest
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Digest as uppercase hex, for operator diagnostics
    pub fn hex_upper(&self) -> String {
        hex::encode_upper(self.digest)
    }

    /// URL-safe base64 (`-` and `_` instead of `+` and `/`), padded
    pub fn url_safe(&self) -> &str {
        &self.url_safe
    }

    /// Percent-encoded form placed in the request path
    pub fn escaped(&self) -> String {
        urlencoding::encode(&self.url_safe).into_owned()
    }
}

/// Recover raw digest bytes from the URL-safe encoding
pub fn decode_url_safe(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE.decode(encoded)
}
