// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end pipeline: obtain an EK public key, fingerprint it, fetch its
//! certificate

use std::fs;
use std::io::Write;

use tracing::{debug, info};

use crate::blob::PublicKeyBlob;
use crate::config::{KeySource, ProvisionPlan};
use crate::device::EkDevice;
use crate::error::{EkResult, StorageError};
use crate::fetch::{CertificateFetcher, HttpTransport};
use crate::fingerprint::Fingerprint;
use crate::lifecycle::{KeyLifecycleManager, Persistence};

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub fingerprint: Fingerprint,
    /// Handle the EK was persisted at, if any
    pub persistent_handle: Option<u32>,
    pub certificate_len: usize,
}

/// Run the whole pipeline described by `plan`
///
/// Operator output (`persistent-handle:`, the verbose hash block and, when no
/// certificate path is configured, the certificate itself) goes to `stdout`.
/// The first failing stage aborts the run.
pub fn provision_or_fetch<D, T, W>(
    plan: &ProvisionPlan,
    device: &mut D,
    fetcher: &CertificateFetcher<T>,
    stdout: &mut W,
) -> EkResult<ProvisionReport>
where
    D: EkDevice,
    T: HttpTransport,
    W: Write,
{
    let (public, persistent_handle) = match &plan.key {
        KeySource::Create(request) => {
            let key = KeyLifecycleManager::new(device).provision(request, plan.output.as_deref())?;
            if let (Persistence::FirstVacant, Some(handle)) =
                (request.persistence, key.persistent_handle)
            {
                writeln!(stdout, "persistent-handle: 0x{:x}", handle).map_err(stdout_error)?;
            }
            (key.public, key.persistent_handle)
        }
        KeySource::Reuse(path) => {
            debug!(path = %path.display(), "reusing saved EK public area");
            (PublicKeyBlob::load(path)?, None)
        }
    };

    let fingerprint = Fingerprint::derive(&public)?;
    if plan.verbose {
        write!(
            stdout,
            "public-key-hash:\n  sha256: {}\n",
            fingerprint.hex_upper()
        )
        .map_err(stdout_error)?;
    }
    info!(fingerprint = %fingerprint.escaped(), "encoded EK fingerprint");

    let certificate = fetcher.fetch(&fingerprint)?;
    match &plan.fetch.cert_path {
        Some(path) => {
            fs::write(path, &certificate).map_err(|source| StorageError::Write {
                target: path.display().to_string(),
                source,
            })?;
            debug!(path = %path.display(), len = certificate.len(), "wrote EK certificate");
        }
        None => {
            stdout.write_all(&certificate).map_err(stdout_error)?;
            stdout.flush().map_err(stdout_error)?;
        }
    }

    Ok(ProvisionReport {
        fingerprint,
        persistent_handle,
        certificate_len: certificate.len(),
    })
}

fn stdout_error(source: std::io::Error) -> StorageError {
    StorageError::Write {
        target: "stdout".to_string(),
        source,
    }
}
