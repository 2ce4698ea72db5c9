// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provisioning configuration
//!
//! `ProvisionConfig` is the raw, user-facing form (CLI flags or a JSON file).
//! `validate()` turns it into a `ProvisionPlan` and performs every option
//! check up front, so a bad option never reaches the TPM.

use std::fs;
use std::path::{Path, PathBuf};

use ektpm2::{DEFAULT_DEVICE, TPM_PERSISTENT_FIRST, TPM_PERSISTENT_LAST};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::AuthValue;
use crate::error::ConfigError;
use crate::fetch::TrustPolicy;
use crate::lifecycle::{CreateRequest, Persistence};
use crate::template::{ek_template, parse_algorithm};

/// Options for one provisioning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Algorithm name or TPM algorithm id
    pub key_algorithm: String,
    pub endorsement_auth: Option<String>,
    pub owner_auth: Option<String>,
    /// userAuth of the created EK
    pub ek_auth: Option<String>,
    /// Hex or decimal handle, or `-` for the first vacant one
    pub persistent_handle: Option<String>,
    pub non_persistent: bool,
    /// Where to save the EK public area
    pub output: Option<PathBuf>,
    /// Where to write the certificate (stdout when absent)
    pub ec_cert: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_http_url")]
    pub server_url: Option<String>,
    pub untrusted: bool,
    /// Reuse a saved public area instead of creating an EK
    pub offline: Option<PathBuf>,
    pub verbose: bool,
    pub device: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            key_algorithm: "rsa".to_string(),
            endorsement_auth: None,
            owner_auth: None,
            ek_auth: None,
            persistent_handle: None,
            non_persistent: false,
            output: None,
            ec_cert: None,
            server_url: None,
            untrusted: false,
            offline: None,
            verbose: false,
            device: DEFAULT_DEVICE.to_string(),
        }
    }
}

fn check_http_url(url: &str) -> Result<(), &'static str> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        Err("url must start with http:// or https://")
    } else if !url.chars().all(|c| c.is_ascii_graphic()) {
        Err("url must contain only printable ASCII characters (no spaces, tabs, newlines, or control characters)")
    } else {
        Ok(())
    }
}

fn deserialize_http_url<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).and_then(|url| match url {
        Some(url) => check_http_url(&url).map(|_| Some(url)).map_err(D::Error::custom),
        None => Ok(None),
    })
}

/// Parse a persistent handle option: hex (`0x...`), decimal, or `-`
pub fn parse_persistent_handle(value: &str) -> Result<Persistence, ConfigError> {
    let value = value.trim();
    if value == "-" {
        return Ok(Persistence::FirstVacant);
    }

    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex_digits) => u32::from_str_radix(hex_digits, 16),
        None => value.parse::<u32>(),
    };
    let handle = parsed.map_err(|_| ConfigError::InvalidPersistentHandle(value.to_string()))?;

    if !(TPM_PERSISTENT_FIRST..=TPM_PERSISTENT_LAST).contains(&handle) {
        return Err(ConfigError::PersistentHandleOutOfRange(handle));
    }
    Ok(Persistence::Fixed(handle))
}

/// Where the public key comes from
#[derive(Debug, Clone)]
pub enum KeySource {
    Create(CreateRequest),
    Reuse(PathBuf),
}

/// Certificate retrieval settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub server_url: String,
    pub trust: TrustPolicy,
    pub cert_path: Option<PathBuf>,
}

/// A validated provisioning run
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub key: KeySource,
    pub output: Option<PathBuf>,
    pub fetch: FetchPlan,
    pub verbose: bool,
    pub device: String,
}

impl ProvisionConfig {
    /// Load from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |reason: String| ConfigError::File {
            path: path.to_path_buf(),
            reason,
        };
        let data = fs::read(path).map_err(|e| file_error(e.to_string()))?;
        serde_json::from_slice(&data).map_err(|e| file_error(e.to_string()))
    }

    /// Check every option and build the plan
    pub fn validate(&self) -> Result<ProvisionPlan, ConfigError> {
        let server_url = self
            .server_url
            .clone()
            .ok_or(ConfigError::MissingServerUrl)?;
        check_http_url(&server_url).map_err(|reason| ConfigError::InvalidServerUrl {
            url: server_url.clone(),
            reason: reason.to_string(),
        })?;

        let key = match &self.offline {
            Some(path) => KeySource::Reuse(path.clone()),
            None => KeySource::Create(self.create_request()?),
        };

        Ok(ProvisionPlan {
            key,
            output: self.output.clone(),
            fetch: FetchPlan {
                server_url,
                trust: if self.untrusted {
                    TrustPolicy::Insecure
                } else {
                    TrustPolicy::Verify
                },
                cert_path: self.ec_cert.clone(),
            },
            verbose: self.verbose,
            device: self.device.clone(),
        })
    }

    fn create_request(&self) -> Result<CreateRequest, ConfigError> {
        let template = ek_template(parse_algorithm(&self.key_algorithm)?)?;

        let persistence = match (self.non_persistent, self.persistent_handle.as_deref()) {
            (true, Some(handle)) => {
                warn!(handle, "non-persistent mode requested, ignoring persistent handle");
                Persistence::Transient
            }
            (true, None) => Persistence::Transient,
            (false, Some(handle)) => parse_persistent_handle(handle)?,
            (false, None) => return Err(ConfigError::MissingPersistentHandle),
        };

        Ok(CreateRequest {
            template,
            endorsement_auth: AuthValue::parse("endorsement", self.endorsement_auth.as_deref())?,
            owner_auth: AuthValue::parse("owner", self.owner_auth.as_deref())?,
            ek_auth: AuthValue::parse("EK", self.ek_auth.as_deref())?,
            persistence,
        })
    }
}
