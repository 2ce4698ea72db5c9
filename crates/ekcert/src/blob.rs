// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable record of an EK public area
//!
//! Stored as a marshalled TPM2B_PUBLIC, the same layout tpm2-tools writes, so
//! records interoperate with `tpm2_readpublic -o` and friends.

use std::fs;
use std::path::Path;

use ektpm2::{PublicArea, PublicId, TpmError};
use tracing::debug;

use crate::error::StorageError;

/// Public portion of an EK, immutable once obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyBlob {
    area: PublicArea,
}

impl PublicKeyBlob {
    /// Wrap a TPMT_PUBLIC as returned by CreatePrimary
    pub fn from_public_area(bytes: &[u8]) -> Result<Self, TpmError> {
        PublicArea::unmarshal(bytes).map(|area| Self { area })
    }

    pub fn area(&self) -> &PublicArea {
        &self.area
    }

    /// RSA modulus, if this is an RSA key
    pub fn rsa_modulus(&self) -> Option<&[u8]> {
        match &self.area.unique {
            PublicId::Rsa(modulus) => Some(modulus),
            _ => None,
        }
    }

    /// Serialized TPM2B_PUBLIC
    pub fn to_bytes(&self) -> Vec<u8> {
        self.area.to_tpm2b()
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        fs::write(path, self.to_bytes()).map_err(|source| StorageError::Save {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "saved EK public area");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let data = fs::read(path).map_err(|source| StorageError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let area = PublicArea::from_tpm2b(&data).map_err(|source| StorageError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { area })
    }
}

impl From<PublicArea> for PublicKeyBlob {
    fn from(area: PublicArea) -> Self {
        Self { area }
    }
}
