// SPDX-License-Identifier: MIT OR Apache-2.0

//! EK creation, optional persistence and transient cleanup
//!
//! Resources are released in reverse order of acquisition on every path:
//! persisted-handle reference, owner session, transient EK, endorsement
//! session. Each release is attempted even if an earlier one failed.

use std::path::Path;

use ektpm2::{Hierarchy, PasswordSession, PublicArea};
use tracing::{debug, info, warn};

use crate::auth::AuthValue;
use crate::blob::PublicKeyBlob;
use crate::device::EkDevice;
use crate::error::{ConfigError, EkError, EkResult};

/// Where the EK should end up once created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Leave no copy on the TPM after provisioning
    Transient,
    /// Persist at a caller-chosen handle
    Fixed(u32),
    /// Persist at the lowest vacant persistent handle
    FirstVacant,
}

/// Everything needed to create an EK
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub template: PublicArea,
    pub endorsement_auth: AuthValue,
    pub owner_auth: AuthValue,
    pub ek_auth: AuthValue,
    pub persistence: Persistence,
}

/// Outcome of a successful provisioning run
#[derive(Debug, Clone)]
pub struct ProvisionedKey {
    pub public: PublicKeyBlob,
    pub persistent_handle: Option<u32>,
}

/// Creates EKs on a TPM
pub struct KeyLifecycleManager<'a, D: EkDevice> {
    device: &'a mut D,
}

impl<'a, D: EkDevice> KeyLifecycleManager<'a, D> {
    pub fn new(device: &'a mut D) -> Self {
        Self { device }
    }

    /// Work out the persistent handle before anything is created
    pub fn resolve_persistence(&mut self, persistence: Persistence) -> EkResult<Option<u32>> {
        match persistence {
            Persistence::Transient => Ok(None),
            Persistence::Fixed(handle) => Ok(Some(handle)),
            Persistence::FirstVacant => {
                let handle = self
                    .device
                    .find_vacant_persistent_handle()
                    .map_err(EkError::tpm("GetCapability"))?
                    .ok_or(ConfigError::NoVacantPersistentHandle)?;
                debug!(handle = format_args!("0x{:08x}", handle), "found vacant persistent handle");
                Ok(Some(handle))
            }
        }
    }

    /// Create the EK, persist it if requested, flush the transient copy and
    /// write the public area to `output`
    pub fn provision(
        &mut self,
        request: &CreateRequest,
        output: Option<&Path>,
    ) -> EkResult<ProvisionedKey> {
        self.device.connect().map_err(EkError::tpm("OpenDevice"))?;
        let target = self.resolve_persistence(request.persistence)?;

        let public = with_session(
            self.device,
            Hierarchy::Endorsement,
            &request.endorsement_auth,
            |device, session| create_and_release(device, session, request, target),
        )?;

        match output {
            Some(path) => public.save(path)?,
            None => debug!("no output path given, EK public area not saved"),
        }

        Ok(ProvisionedKey {
            public,
            persistent_handle: target,
        })
    }
}

/// Run `f` inside a session for `hierarchy`, closing it whatever `f` returns
fn with_session<D, T>(
    device: &mut D,
    hierarchy: Hierarchy,
    auth: &AuthValue,
    f: impl FnOnce(&mut D, &PasswordSession) -> EkResult<T>,
) -> EkResult<T>
where
    D: EkDevice,
{
    let session = device
        .start_auth_session(hierarchy, auth)
        .map_err(EkError::session(hierarchy))?;

    let result = f(device, &session);
    let closed = device.close_auth_session(session);

    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(EkError::session(hierarchy)(e)),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                warn!(%hierarchy, "failed to close session: {}", close_err);
            }
            Err(e)
        }
    }
}

fn create_and_release<D: EkDevice>(
    device: &mut D,
    session: &PasswordSession,
    request: &CreateRequest,
    target: Option<u32>,
) -> EkResult<PublicKeyBlob> {
    let created = device
        .create_primary(session, &request.template, &request.ek_auth)
        .map_err(EkError::tpm("CreatePrimary"))?;
    let transient = created.handle;

    let outcome = PublicKeyBlob::from_public_area(&created.public_area)
        .map_err(EkError::tpm("CreatePrimary"))
        .and_then(|public| match target {
            Some(handle) => persist(device, transient, handle, &request.owner_auth).map(|_| public),
            None => Ok(public),
        });

    // The transient copy must not outlive provisioning, even on failure
    let flushed = device
        .flush_context(transient)
        .map_err(EkError::tpm("FlushContext"));

    match (outcome, flushed) {
        (Ok(public), Ok(())) => {
            info!("Flush transient EK succ.");
            Ok(public)
        }
        (Ok(_), Err(e)) => Err(e),
        (Err(e), flushed) => {
            match flushed {
                Ok(()) => info!("Flush transient EK succ."),
                Err(flush_err) => warn!("failed to flush transient EK: {}", flush_err),
            }
            Err(e)
        }
    }
}

fn persist<D: EkDevice>(
    device: &mut D,
    transient: u32,
    persistent: u32,
    owner_auth: &AuthValue,
) -> EkResult<()> {
    with_session(device, Hierarchy::Owner, owner_auth, |device, session| {
        let persisted = device
            .evict_control(session, transient, persistent)
            .map_err(EkError::tpm("EvictControl"))?;
        info!("EvictControl EK persistent succ.");

        device
            .close_handle(persisted)
            .map_err(EkError::tpm("TR_Close"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceNode;
    use crate::error::StorageError;
    use crate::template::{template_for, KeyAlgorithm};
    use crate::testing::{Call, FakeTpm, RC_NV_DEFINED};
    use ektpm2::{PublicId, TpmError};

    fn request(persistence: Persistence) -> CreateRequest {
        CreateRequest {
            template: template_for(KeyAlgorithm::Rsa),
            endorsement_auth: AuthValue::empty(),
            owner_auth: AuthValue::new(b"owner".to_vec()),
            ek_auth: AuthValue::empty(),
            persistence,
        }
    }

    #[test]
    fn test_transient_only() {
        let mut tpm = FakeTpm::new();
        let key = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::Transient), None)
            .unwrap();

        assert_eq!(key.persistent_handle, None);
        assert_eq!(
            key.public.area().unique,
            PublicId::Rsa((0..=255u8).rev().collect())
        );
        assert_eq!(
            tpm.calls,
            vec![
                Call::StartSession(Hierarchy::Endorsement),
                Call::CreatePrimary,
                Call::Flush(0x80000000),
                Call::CloseSession(Hierarchy::Endorsement),
            ]
        );
        assert!(tpm.transient.is_empty());
    }

    #[test]
    fn test_fixed_handle_release_order() {
        let mut tpm = FakeTpm::new();
        let key = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::Fixed(0x81010001)), None)
            .unwrap();

        assert_eq!(key.persistent_handle, Some(0x81010001));
        assert!(tpm.persistent.contains(&0x81010001));
        assert_eq!(
            tpm.calls,
            vec![
                Call::StartSession(Hierarchy::Endorsement),
                Call::CreatePrimary,
                Call::StartSession(Hierarchy::Owner),
                Call::EvictControl {
                    object: 0x80000000,
                    persistent: 0x81010001
                },
                Call::CloseHandle(0x81010001),
                Call::CloseSession(Hierarchy::Owner),
                Call::Flush(0x80000000),
                Call::CloseSession(Hierarchy::Endorsement),
            ]
        );
    }

    #[test]
    fn test_occupied_handle_still_flushes() {
        let mut tpm = FakeTpm::with_persistent(&[0x81010001]);
        let err = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::Fixed(0x81010001)), None)
            .unwrap_err();

        assert!(matches!(err, EkError::Tpm { operation: "EvictControl", .. }));
        assert_eq!(err.tpm_response_code(), Some(RC_NV_DEFINED));
        assert!(tpm.calls.contains(&Call::Flush(0x80000000)));
        assert!(!tpm.calls.iter().any(|c| matches!(c, Call::CloseHandle(_))));
        assert!(tpm.transient.is_empty());
        assert_eq!(tpm.calls.last(), Some(&Call::CloseSession(Hierarchy::Endorsement)));
    }

    #[test]
    fn test_first_vacant_chosen_before_create() {
        let mut tpm = FakeTpm::with_persistent(&[0x81000000, 0x81000001]);
        let key = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::FirstVacant), None)
            .unwrap();

        assert_eq!(key.persistent_handle, Some(0x81000002));
        assert_eq!(tpm.calls[0], Call::FindVacant);
        assert_eq!(tpm.calls[1], Call::StartSession(Hierarchy::Endorsement));
    }

    #[test]
    fn test_no_vacant_handle_creates_nothing() {
        let mut tpm = FakeTpm::new();
        tpm.persistent_full = true;
        let err = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::FirstVacant), None)
            .unwrap_err();

        assert!(matches!(
            err,
            EkError::Config(ConfigError::NoVacantPersistentHandle)
        ));
        assert_eq!(tpm.calls, vec![Call::FindVacant]);
        assert_eq!(tpm.created(), 0);
    }

    #[test]
    fn test_alias_close_failure_still_flushes() {
        let mut tpm = FakeTpm::new();
        tpm.fail_close_handle = true;
        let err = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::Fixed(0x81000010)), None)
            .unwrap_err();

        assert!(matches!(err, EkError::Tpm { operation: "TR_Close", .. }));
        assert!(tpm.calls.contains(&Call::CloseSession(Hierarchy::Owner)));
        assert!(tpm.calls.contains(&Call::Flush(0x80000000)));
        assert!(tpm.transient.is_empty());
    }

    #[test]
    fn test_endorsement_session_failure_is_distinct() {
        let mut tpm = FakeTpm::new();
        tpm.fail_session = Some(Hierarchy::Endorsement);
        let err = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::Transient), None)
            .unwrap_err();

        assert!(matches!(
            err,
            EkError::Session {
                hierarchy: Hierarchy::Endorsement,
                ..
            }
        ));
        assert_eq!(tpm.created(), 0);
    }

    #[test]
    fn test_owner_session_failure_flushes_transient() {
        let mut tpm = FakeTpm::new();
        tpm.fail_session = Some(Hierarchy::Owner);
        let err = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::Fixed(0x81000010)), None)
            .unwrap_err();

        assert!(matches!(err, EkError::Session { hierarchy: Hierarchy::Owner, .. }));
        assert!(tpm.calls.contains(&Call::Flush(0x80000000)));
        assert!(!tpm.calls.iter().any(|c| matches!(c, Call::EvictControl { .. })));
    }

    #[test]
    fn test_create_failure_is_tpm_error() {
        let mut tpm = FakeTpm::new();
        tpm.fail_create = Some(0x902);
        let err = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::Transient), None)
            .unwrap_err();

        assert!(matches!(err, EkError::Tpm { operation: "CreatePrimary", .. }));
        assert_eq!(err.tpm_response_code(), Some(0x902));
        assert!(!tpm.calls.iter().any(|c| matches!(c, Call::Flush(_))));
        assert_eq!(tpm.calls.last(), Some(&Call::CloseSession(Hierarchy::Endorsement)));
    }

    #[test]
    fn test_missing_device_is_not_a_session_failure() {
        let mut node = DeviceNode::new("/nonexistent/tpmrm9");
        let err = KeyLifecycleManager::new(&mut node)
            .provision(&request(Persistence::Transient), None)
            .unwrap_err();

        match err {
            EkError::Tpm {
                operation: "OpenDevice",
                source: TpmError::Io { .. },
            } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_flush_failure_reported() {
        let mut tpm = FakeTpm::new();
        tpm.fail_flush = true;
        let err = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::Transient), None)
            .unwrap_err();
        assert!(matches!(err, EkError::Tpm { operation: "FlushContext", .. }));
    }

    #[test]
    fn test_public_area_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ek.pub");
        let mut tpm = FakeTpm::new();
        let key = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::Transient), Some(&path))
            .unwrap();

        assert_eq!(PublicKeyBlob::load(&path).unwrap(), key.public);
    }

    #[test]
    fn test_output_failure_after_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing/ek.pub");
        let mut tpm = FakeTpm::new();
        let err = KeyLifecycleManager::new(&mut tpm)
            .provision(&request(Persistence::Fixed(0x81000020)), Some(&path))
            .unwrap_err();

        assert!(matches!(err, EkError::Storage(StorageError::Save { .. })));
        // the TPM side is committed and not rolled back
        assert!(tpm.persistent.contains(&0x81000020));
        assert!(tpm.transient.is_empty());
    }
}
