// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error hierarchy for EK provisioning
//!
//! Configuration problems, TPM failures, durable-storage failures and network
//! failures are kept in separate variants so a caller can always tell which
//! side of the pipeline broke.

use std::path::PathBuf;

use ektpm2::{Hierarchy, TpmError};
use thiserror::Error;

/// Result type alias for provisioning operations
pub type EkResult<T> = Result<T, EkError>;

/// Top-level error for the provisioning pipeline
#[derive(Debug, Error)]
pub enum EkError {
    /// Invalid or inconsistent options, detected before touching the TPM
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Could not obtain (or release) an authorization session
    #[error("failed to get authorization session for the {hierarchy} hierarchy: {source}")]
    Session {
        hierarchy: Hierarchy,
        #[source]
        source: TpmError,
    },

    /// A TPM command failed
    #[error("TPM operation {operation} failed: {source}")]
    Tpm {
        operation: &'static str,
        #[source]
        source: TpmError,
    },

    /// Reading or writing the public key record or certificate failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The public key cannot be fingerprinted
    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    /// Talking to the manufacturer's certificate service failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl EkError {
    pub(crate) fn tpm(operation: &'static str) -> impl FnOnce(TpmError) -> EkError {
        move |source| EkError::Tpm { operation, source }
    }

    pub(crate) fn session(hierarchy: Hierarchy) -> impl FnOnce(TpmError) -> EkError {
        move |source| EkError::Session { hierarchy, source }
    }

    /// The `TPM_RC` returned by the TPM, if this is a TPM-side failure
    pub fn tpm_response_code(&self) -> Option<u32> {
        match self {
            EkError::Tpm { source, .. } | EkError::Session { source, .. } => source.response_code(),
            _ => None,
        }
    }

    /// Process exit status: 2 for option errors, 1 for everything else
    pub fn exit_code(&self) -> u8 {
        match self {
            EkError::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Must specify a remote server url!")]
    MissingServerUrl,

    #[error("invalid server url {url:?}: {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error("invalid algorithm {0:?}")]
    InvalidAlgorithm(String),

    #[error("The algorithm type input({0:04x}) is not supported!")]
    UnsupportedAlgorithm(u16),

    #[error("invalid {role} authorization: {reason}")]
    InvalidAuth { role: &'static str, reason: String },

    #[error("invalid persistent handle {0:?}")]
    InvalidPersistentHandle(String),

    #[error("persistent handle 0x{0:08x} is outside the persistent range 0x81000000-0x81ffffff")]
    PersistentHandleOutOfRange(u32),

    #[error("Persistent handle for EK was not provided")]
    MissingPersistentHandle,

    #[error("unable to find a vacant persistent handle")]
    NoVacantPersistentHandle,

    #[error("failed to read config file {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

/// Durable storage errors (public key record, certificate output)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to save public key to {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load public key from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} does not hold a valid TPM2B_PUBLIC: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: TpmError,
    },

    #[error("failed to write {target}: {source}")]
    Write {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fingerprint derivation errors
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// Only RSA endorsement keys have a defined fingerprint construction
    #[error("no EK fingerprint construction is defined for {0} keys")]
    UnsupportedKeyType(&'static str),

    #[error("RSA public key has an empty modulus")]
    EmptyModulus,
}

/// Network errors, never conflated with TPM errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}
