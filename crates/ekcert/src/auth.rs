// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authorization value parsing
//!
//! Follows the tpm2-tools conventions: `str:<text>`, `hex:<bytes>`,
//! `file:<path>`, or a bare string. Policy-session forms are not accepted.

use std::fmt;
use std::fs;

use ektpm2::session::MAX_AUTH_SIZE;

use crate::error::ConfigError;

/// A decoded authorization value (hierarchy password or object userAuth)
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthValue(Vec<u8>);

impl AuthValue {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse an optional authorization string for `role` ("endorsement", ...)
    pub fn parse(role: &'static str, value: Option<&str>) -> Result<Self, ConfigError> {
        let Some(value) = value else {
            return Ok(Self::empty());
        };
        let invalid = |reason: String| ConfigError::InvalidAuth { role, reason };

        let auth = if let Some(text) = value.strip_prefix("str:") {
            Self::new(text.as_bytes())
        } else if let Some(hex_value) = value.strip_prefix("hex:") {
            hex::decode(hex_value)
                .map(Self::new)
                .map_err(|e| invalid(format!("bad hex value: {}", e)))?
        } else if let Some(path) = value.strip_prefix("file:") {
            if path == "-" {
                return Err(invalid("reading the auth value from stdin is not supported".into()));
            }
            fs::read(path)
                .map(Self::new)
                .map_err(|e| invalid(format!("cannot read {}: {}", path, e)))?
        } else if value.starts_with("session:") || value.starts_with("pcr:") {
            return Err(invalid(format!(
                "policy session authorization {:?} is not supported",
                value
            )));
        } else {
            Self::new(value.as_bytes())
        };

        if auth.0.len() > MAX_AUTH_SIZE {
            return Err(invalid(format!(
                "value is {} bytes, maximum is {}",
                auth.0.len(),
                MAX_AUTH_SIZE
            )));
        }
        Ok(auth)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for AuthValue {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl fmt::Debug for AuthValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthValue(<{} bytes>)", self.0.len())
    }
}
