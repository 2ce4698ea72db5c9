// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manufacturer certificate retrieval over HTTPS

use reqwest::blocking::Client;
use rustls::crypto::CryptoProvider;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::fingerprint::Fingerprint;

/// How the server's TLS certificate is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustPolicy {
    /// Normal chain and hostname verification
    #[default]
    Verify,
    /// Accept any server certificate
    Insecure,
}

/// Minimal HTTP surface needed for certificate retrieval
pub trait HttpTransport {
    /// GET `url`, returning the full body of a successful response
    fn get(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Blocking reqwest client backed by rustls
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(trust: TrustPolicy) -> Result<Self, TransportError> {
        // Only the first install wins; later calls are harmless
        let _ = CryptoProvider::install_default(rustls_rustcrypto::provider());
        let client = Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(trust == TrustPolicy::Insecure)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        debug!(%url, status = status.as_u16(), "certificate server responded");
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().map_err(|source| TransportError::Body {
            url: url.to_string(),
            source,
        })?;
        Ok(body.to_vec())
    }
}

/// Looks up certificates by EK fingerprint under a base URL
pub struct CertificateFetcher<T: HttpTransport = ReqwestTransport> {
    base_url: String,
    transport: T,
}

impl CertificateFetcher<ReqwestTransport> {
    pub fn new(base_url: impl Into<String>, trust: TrustPolicy) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(trust)?;
        Ok(Self::with_transport(base_url, trust, transport))
    }
}

impl<T: HttpTransport> CertificateFetcher<T> {
    pub fn with_transport(base_url: impl Into<String>, trust: TrustPolicy, transport: T) -> Self {
        if trust == TrustPolicy::Insecure {
            warn!("TLS certificate verification of the certificate server is disabled");
        }
        Self {
            base_url: base_url.into(),
            transport,
        }
    }

    /// Full request URL: base URL with the escaped fingerprint appended
    pub fn url_for(&self, fingerprint: &Fingerprint) -> String {
        format!("{}{}", self.base_url, fingerprint.escaped())
    }

    /// Retrieve the certificate for `fingerprint`
    ///
    /// Returns the body only once it has been received in full; a non-2xx
    /// status is an error.
    pub fn fetch(&self, fingerprint: &Fingerprint) -> Result<Vec<u8>, TransportError> {
        let url = self.url_for(fingerprint);
        debug!(%url, "requesting EK certificate");
        self.transport.get(&url)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
