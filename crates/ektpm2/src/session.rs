// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hierarchies and password authorization sessions

use std::fmt;

use crate::error::{Result, TpmError};
use crate::{TPM_RH_ENDORSEMENT, TPM_RH_OWNER};

/// Largest authValue a TPM accepts (size of a SHA-512 digest)
pub const MAX_AUTH_SIZE: usize = 64;

/// Authorization domains that can own or persist objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hierarchy {
    Owner,
    Endorsement,
}

impl Hierarchy {
    /// Permanent handle of the hierarchy
    pub fn handle(&self) -> u32 {
        match self {
            Hierarchy::Owner => TPM_RH_OWNER,
            Hierarchy::Endorsement => TPM_RH_ENDORSEMENT,
        }
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Hierarchy::Owner => "owner",
            Hierarchy::Endorsement => "endorsement",
        })
    }
}

/// A TPM_RS_PW session bound to one hierarchy
///
/// Password sessions carry the authValue in clear in every command; nothing
/// is allocated on the TPM, so closing one only wipes the local copy.
pub struct PasswordSession {
    hierarchy: Hierarchy,
    auth: Vec<u8>,
}

impl PasswordSession {
    pub fn new(hierarchy: Hierarchy, auth: Vec<u8>) -> Result<Self> {
        if auth.len() > MAX_AUTH_SIZE {
            return Err(TpmError::AuthTooLarge {
                len: auth.len(),
                max: MAX_AUTH_SIZE,
            });
        }
        Ok(Self { hierarchy, auth })
    }

    pub fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    pub(crate) fn auth_value(&self) -> &[u8] {
        &self.auth
    }
}

impl Drop for PasswordSession {
    fn drop(&mut self) {
        self.auth.iter_mut().for_each(|b| *b = 0);
    }
}

impl fmt::Debug for PasswordSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordSession")
            .field("hierarchy", &self.hierarchy)
            .field("auth", &"<redacted>")
            .finish()
    }
}
