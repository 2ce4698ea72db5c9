// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted TPM and HTTP doubles for unit tests

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex};

use ektpm2::{
    CreatePrimaryResult, Hierarchy, PasswordSession, PublicArea, PublicId, TpmCc, TpmError,
};

use crate::auth::AuthValue;
use crate::device::EkDevice;
use crate::error::TransportError;
use crate::fetch::HttpTransport;

/// TPM_RC_NV_DEFINED: the persistent handle is already in use
pub(crate) const RC_NV_DEFINED: u32 = 0x14C;

/// Every capability call the fake observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    StartSession(Hierarchy),
    CloseSession(Hierarchy),
    CreatePrimary,
    EvictControl { object: u32, persistent: u32 },
    CloseHandle(u32),
    Flush(u32),
    FindVacant,
}

pub(crate) struct FakeTpm {
    pub calls: Vec<Call>,
    pub persistent: BTreeSet<u32>,
    pub transient: BTreeSet<u32>,
    pub modulus: Vec<u8>,
    pub fail_session: Option<Hierarchy>,
    pub fail_create: Option<u32>,
    pub fail_close_handle: bool,
    pub fail_flush: bool,
    pub persistent_full: bool,
    next_handle: u32,
}

impl FakeTpm {
    pub(crate) fn new() -> Self {
        Self {
            calls: Vec::new(),
            persistent: BTreeSet::new(),
            transient: BTreeSet::new(),
            modulus: (0..=255u8).rev().collect(),
            fail_session: None,
            fail_create: None,
            fail_close_handle: false,
            fail_flush: false,
            persistent_full: false,
            next_handle: 0x80000000,
        }
    }

    pub(crate) fn with_persistent(handles: &[u32]) -> Self {
        let mut tpm = Self::new();
        tpm.persistent.extend(handles);
        tpm
    }

    pub(crate) fn created(&self) -> usize {
        self.calls.iter().filter(|c| **c == Call::CreatePrimary).count()
    }

    fn rc(command: TpmCc, code: u32) -> TpmError {
        TpmError::ResponseCode { command, code }
    }
}

impl EkDevice for FakeTpm {
    fn start_auth_session(
        &mut self,
        hierarchy: Hierarchy,
        auth: &AuthValue,
    ) -> Result<PasswordSession, TpmError> {
        self.calls.push(Call::StartSession(hierarchy));
        if self.fail_session == Some(hierarchy) {
            return Err(TpmError::AuthTooLarge { len: 99, max: 64 });
        }
        PasswordSession::new(hierarchy, auth.as_bytes().to_vec())
    }

    fn close_auth_session(&mut self, session: PasswordSession) -> Result<(), TpmError> {
        self.calls.push(Call::CloseSession(session.hierarchy()));
        Ok(())
    }

    fn create_primary(
        &mut self,
        _session: &PasswordSession,
        template: &PublicArea,
        _user_auth: &AuthValue,
    ) -> Result<CreatePrimaryResult, TpmError> {
        self.calls.push(Call::CreatePrimary);
        if let Some(code) = self.fail_create {
            return Err(Self::rc(TpmCc::CreatePrimary, code));
        }

        let mut public = template.clone();
        public.unique = match &template.unique {
            PublicId::Rsa(_) => PublicId::Rsa(self.modulus.clone()),
            PublicId::Ecc { .. } => PublicId::Ecc {
                x: vec![0x11; 32],
                y: vec![0x22; 32],
            },
            PublicId::KeyedHash(_) => PublicId::KeyedHash(vec![0x33; 32]),
            PublicId::SymCipher(_) => PublicId::SymCipher(vec![0x44; 32]),
        };

        let handle = self.next_handle;
        self.next_handle += 1;
        self.transient.insert(handle);

        Ok(CreatePrimaryResult {
            handle,
            public_area: public.marshal(),
        })
    }

    fn evict_control(
        &mut self,
        _session: &PasswordSession,
        object: u32,
        persistent: u32,
    ) -> Result<u32, TpmError> {
        self.calls.push(Call::EvictControl { object, persistent });
        if !self.persistent.insert(persistent) {
            return Err(Self::rc(TpmCc::EvictControl, RC_NV_DEFINED));
        }
        Ok(persistent)
    }

    fn close_handle(&mut self, handle: u32) -> Result<(), TpmError> {
        self.calls.push(Call::CloseHandle(handle));
        if self.fail_close_handle {
            return Err(TpmError::Malformed("stale handle reference".into()));
        }
        Ok(())
    }

    fn flush_context(&mut self, handle: u32) -> Result<(), TpmError> {
        self.calls.push(Call::Flush(handle));
        if self.fail_flush {
            return Err(Self::rc(TpmCc::FlushContext, 0x18B));
        }
        self.transient.remove(&handle);
        Ok(())
    }

    fn find_vacant_persistent_handle(&mut self) -> Result<Option<u32>, TpmError> {
        self.calls.push(Call::FindVacant);
        if self.persistent_full {
            return Ok(None);
        }
        let used: Vec<u32> = self.persistent.iter().copied().collect();
        Ok(ektpm2::handles::first_vacant(&used))
    }
}

/// HTTP double returning a canned response and recording every URL
pub(crate) struct FakeTransport {
    pub requests: RefCell<Vec<String>>,
    pub status: Option<u16>,
    pub body: Vec<u8>,
}

impl FakeTransport {
    pub(crate) fn ok(body: &[u8]) -> Self {
        Self {
            requests: RefCell::new(Vec::new()),
            status: None,
            body: body.to_vec(),
        }
    }

    pub(crate) fn failing(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::ok(&[])
        }
    }
}

impl HttpTransport for FakeTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.requests.borrow_mut().push(url.to_string());
        match self.status {
            Some(status) => Err(TransportError::Status {
                url: url.to_string(),
                status,
            }),
            None => Ok(self.body.clone()),
        }
    }
}

/// Log sink for asserting on tracing output
#[derive(Clone, Default)]
pub(crate) struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub(crate) fn contents(&self) -> String {
        let buf = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Run `f` with a subscriber writing into this capture
    pub(crate) fn scope<T>(&self, f: impl FnOnce() -> T) -> T {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut inner) = self.0.lock() {
            inner.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
