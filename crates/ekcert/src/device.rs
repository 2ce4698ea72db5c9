// SPDX-License-Identifier: MIT OR Apache-2.0

//! TPM capabilities consumed by the provisioning pipeline

use std::io::{Read, Write};

use ektpm2::{CreatePrimaryResult, HandleOps, Hierarchy, PasswordSession, PublicArea, Tpm, TpmError};
use tracing::debug;

use crate::auth::AuthValue;

/// The narrow slice of the TPM that EK provisioning needs
pub trait EkDevice {
    /// Make the device ready for commands
    fn connect(&mut self) -> Result<(), TpmError> {
        Ok(())
    }

    /// Obtain an authorization session for `hierarchy`
    fn start_auth_session(
        &mut self,
        hierarchy: Hierarchy,
        auth: &AuthValue,
    ) -> Result<PasswordSession, TpmError>;

    fn close_auth_session(&mut self, session: PasswordSession) -> Result<(), TpmError>;

    /// Create a primary object in the session's hierarchy
    fn create_primary(
        &mut self,
        session: &PasswordSession,
        template: &PublicArea,
        user_auth: &AuthValue,
    ) -> Result<CreatePrimaryResult, TpmError>;

    /// Persist `object` at `persistent`, returning a reference to the persisted copy
    fn evict_control(
        &mut self,
        session: &PasswordSession,
        object: u32,
        persistent: u32,
    ) -> Result<u32, TpmError>;

    /// Drop a local reference without touching the object on the TPM
    fn close_handle(&mut self, handle: u32) -> Result<(), TpmError>;

    /// Remove a transient object from TPM memory
    fn flush_context(&mut self, handle: u32) -> Result<(), TpmError>;

    fn find_vacant_persistent_handle(&mut self) -> Result<Option<u32>, TpmError>;
}

impl<D: Read + Write> EkDevice for Tpm<D> {
    fn start_auth_session(
        &mut self,
        hierarchy: Hierarchy,
        auth: &AuthValue,
    ) -> Result<PasswordSession, TpmError> {
        PasswordSession::new(hierarchy, auth.as_bytes().to_vec())
    }

    fn close_auth_session(&mut self, session: PasswordSession) -> Result<(), TpmError> {
        debug!(hierarchy = %session.hierarchy(), "closing password session");
        Ok(())
    }

    fn create_primary(
        &mut self,
        session: &PasswordSession,
        template: &PublicArea,
        user_auth: &AuthValue,
    ) -> Result<CreatePrimaryResult, TpmError> {
        Tpm::create_primary(self, session, template, user_auth.as_bytes())
    }

    fn evict_control(
        &mut self,
        session: &PasswordSession,
        object: u32,
        persistent: u32,
    ) -> Result<u32, TpmError> {
        Tpm::evict_control(self, session, object, persistent)
    }

    fn close_handle(&mut self, _handle: u32) -> Result<(), TpmError> {
        // Raw handles carry no local state
        Ok(())
    }

    fn flush_context(&mut self, handle: u32) -> Result<(), TpmError> {
        Tpm::flush_context(self, handle)
    }

    fn find_vacant_persistent_handle(&mut self) -> Result<Option<u32>, TpmError> {
        HandleOps::find_vacant_persistent_handle(self)
    }
}

/// A TPM device node opened on first use
///
/// Reusing a saved public key never needs the TPM, so the device is only
/// opened once a command is actually issued.
pub struct DeviceNode {
    path: String,
    tpm: Option<Tpm>,
}

impl DeviceNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tpm: None,
        }
    }

    fn tpm(&mut self) -> Result<&mut Tpm, TpmError> {
        let tpm = match self.tpm.take() {
            Some(tpm) => tpm,
            None => {
                debug!(path = %self.path, "opening TPM device");
                Tpm::open_path(&self.path)?
            }
        };
        Ok(self.tpm.insert(tpm))
    }
}

impl EkDevice for DeviceNode {
    fn connect(&mut self) -> Result<(), TpmError> {
        self.tpm().map(|_| ())
    }

    fn start_auth_session(
        &mut self,
        hierarchy: Hierarchy,
        auth: &AuthValue,
    ) -> Result<PasswordSession, TpmError> {
        self.tpm()?.start_auth_session(hierarchy, auth)
    }

    fn close_auth_session(&mut self, session: PasswordSession) -> Result<(), TpmError> {
        self.tpm()?.close_auth_session(session)
    }

    fn create_primary(
        &mut self,
        session: &PasswordSession,
        template: &PublicArea,
        user_auth: &AuthValue,
    ) -> Result<CreatePrimaryResult, TpmError> {
        EkDevice::create_primary(self.tpm()?, session, template, user_auth)
    }

    fn evict_control(
        &mut self,
        session: &PasswordSession,
        object: u32,
        persistent: u32,
    ) -> Result<u32, TpmError> {
        EkDevice::evict_control(self.tpm()?, session, object, persistent)
    }

    fn close_handle(&mut self, handle: u32) -> Result<(), TpmError> {
        self.tpm()?.close_handle(handle)
    }

    fn flush_context(&mut self, handle: u32) -> Result<(), TpmError> {
        EkDevice::flush_context(self.tpm()?, handle)
    }

    fn find_vacant_persistent_handle(&mut self) -> Result<Option<u32>, TpmError> {
        EkDevice::find_vacant_persistent_handle(self.tpm()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_node_opens_lazily() {
        let mut node = DeviceNode::new("/nonexistent/tpmrm9");
        assert!(node.tpm.is_none());

        let err = node.flush_context(0x80000000).unwrap_err();
        assert!(matches!(err, TpmError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/tpmrm9"));
    }
}
