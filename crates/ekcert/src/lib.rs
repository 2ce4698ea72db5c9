// SPDX-License-Identifier: MIT OR Apache-2.0

//! Endorsement key provisioning and manufacturer certificate retrieval
//!
//! Creates a TCG-profile EK under the endorsement hierarchy, optionally
//! persists it, derives its fingerprint and downloads the matching EK
//! certificate from the manufacturer's service.
//!
//! ```no_run
//! use ekcert::{provision_or_fetch, CertificateFetcher, DeviceNode, ProvisionConfig};
//!
//! let config = ProvisionConfig {
//!     server_url: Some("https://ekop.intel.com/ekcertservice/".into()),
//!     persistent_handle: Some("0x81010001".into()),
//!     ..Default::default()
//! };
//! let plan = config.validate()?;
//! let fetcher = CertificateFetcher::new(plan.fetch.server_url.clone(), plan.fetch.trust)?;
//! let mut device = DeviceNode::new(plan.device.clone());
//! provision_or_fetch(&plan, &mut device, &fetcher, &mut std::io::stdout())?;
//! # Ok::<(), ekcert::EkError>(())
//! ```

mod auth;
mod blob;
mod config;
mod device;
mod error;
mod fetch;
mod fingerprint;
mod lifecycle;
pub mod profile;
mod provision;
mod template;

#[cfg(test)]
mod testing;

pub use auth::AuthValue;
pub use blob::PublicKeyBlob;
pub use config::{parse_persistent_handle, FetchPlan, KeySource, ProvisionConfig, ProvisionPlan};
pub use device::{DeviceNode, EkDevice};
pub use error::{ConfigError, EkError, EkResult, FingerprintError, StorageError, TransportError};
pub use fetch::{CertificateFetcher, HttpTransport, ReqwestTransport, TrustPolicy};
pub use fingerprint::{decode_url_safe, Fingerprint};
pub use lifecycle::{CreateRequest, KeyLifecycleManager, Persistence, ProvisionedKey};
pub use provision::{provision_or_fetch, ProvisionReport};
pub use template::{ek_template, parse_algorithm, template_for, KeyAlgorithm};
