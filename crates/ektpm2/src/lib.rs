// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal TPM 2.0 protocol implementation
//!
//! Direct communication with TPM via /dev/tpmrm0 without any C dependencies.
//! Covers the handful of commands needed to provision an endorsement key:
//! CreatePrimary, EvictControl, FlushContext and GetCapability.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

use tracing::debug;

pub mod error;
pub mod handles;
pub mod public;
pub mod session;

pub use error::{Result, TpmError};
pub use handles::HandleOps;
pub use public::{AlgScheme, KeyedHashScheme, PublicArea, PublicId, PublicParms, SymDef};
pub use session::{Hierarchy, PasswordSession};

use session::MAX_AUTH_SIZE;

/// Default resource-managed TPM device node
pub const DEFAULT_DEVICE: &str = "/dev/tpmrm0";

/// TPM 2.0 command codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmCc {
    EvictControl = 0x00000120,
    CreatePrimary = 0x00000131,
    FlushContext = 0x00000165,
    GetCapability = 0x0000017A,
}

/// TPM 2.0 structure tags
#[repr(u16)]
#[derive(Debug, Clone, Copy)]
pub enum TpmSt {
    NoSessions = 0x8001,
    Sessions = 0x8002,
}

/// TPM 2.0 return codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TpmRc {
    Success = 0x000,
}

/// TPM 2.0 algorithm identifiers
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TpmAlg {
    Rsa = 0x0001,
    Sha1 = 0x0004,
    Hmac = 0x0005,
    Aes = 0x0006,
    Mgf1 = 0x0007,
    KeyedHash = 0x0008,
    Xor = 0x000A,
    Sha256 = 0x000B,
    Sha384 = 0x000C,
    Sha512 = 0x000D,
    Null = 0x0010,
    RsaSsa = 0x0014,
    RsaEs = 0x0015,
    RsaPss = 0x0016,
    Oaep = 0x0017,
    EcDsa = 0x0018,
    Ecdh = 0x0019,
    Kdf1Sp800_56a = 0x0020,
    Kdf2 = 0x0021,
    Kdf1Sp800_108 = 0x0022,
    Ecc = 0x0023,
    SymCipher = 0x0025,
    Ctr = 0x0040,
    Ofb = 0x0041,
    Cbc = 0x0042,
    Cfb = 0x0043,
    Ecb = 0x0044,
}

impl TpmAlg {
    const ALL: [TpmAlg; 27] = [
        TpmAlg::Rsa,
        TpmAlg::Sha1,
        TpmAlg::Hmac,
        TpmAlg::Aes,
        TpmAlg::Mgf1,
        TpmAlg::KeyedHash,
        TpmAlg::Xor,
        TpmAlg::Sha256,
        TpmAlg::Sha384,
        TpmAlg::Sha512,
        TpmAlg::Null,
        TpmAlg::RsaSsa,
        TpmAlg::RsaEs,
        TpmAlg::RsaPss,
        TpmAlg::Oaep,
        TpmAlg::EcDsa,
        TpmAlg::Ecdh,
        TpmAlg::Kdf1Sp800_56a,
        TpmAlg::Kdf2,
        TpmAlg::Kdf1Sp800_108,
        TpmAlg::Ecc,
        TpmAlg::SymCipher,
        TpmAlg::Ctr,
        TpmAlg::Ofb,
        TpmAlg::Cbc,
        TpmAlg::Cfb,
        TpmAlg::Ecb,
    ];

    /// Get the algorithm name as used on the tpm2-tools command line
    pub fn name(&self) -> &'static str {
        match self {
            TpmAlg::Rsa => "rsa",
            TpmAlg::Sha1 => "sha1",
            TpmAlg::Hmac => "hmac",
            TpmAlg::Aes => "aes",
            TpmAlg::Mgf1 => "mgf1",
            TpmAlg::KeyedHash => "keyedhash",
            TpmAlg::Xor => "xor",
            TpmAlg::Sha256 => "sha256",
            TpmAlg::Sha384 => "sha384",
            TpmAlg::Sha512 => "sha512",
            TpmAlg::Null => "null",
            TpmAlg::RsaSsa => "rsassa",
            TpmAlg::RsaEs => "rsaes",
            TpmAlg::RsaPss => "rsapss",
            TpmAlg::Oaep => "oaep",
            TpmAlg::EcDsa => "ecdsa",
            TpmAlg::Ecdh => "ecdh",
            TpmAlg::Kdf1Sp800_56a => "kdf1_sp800_56a",
            TpmAlg::Kdf2 => "kdf2",
            TpmAlg::Kdf1Sp800_108 => "kdf1_sp800_108",
            TpmAlg::Ecc => "ecc",
            TpmAlg::SymCipher => "symcipher",
            TpmAlg::Ctr => "ctr",
            TpmAlg::Ofb => "ofb",
            TpmAlg::Cbc => "cbc",
            TpmAlg::Cfb => "cfb",
            TpmAlg::Ecb => "ecb",
        }
    }

    /// Try to convert a u16 to a TpmAlg
    pub fn from_u16(val: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| *alg as u16 == val)
    }

    /// Look up an algorithm by its command-line name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(name))
    }
}

/// TPM handle for the owner hierarchy
pub const TPM_RH_OWNER: u32 = 0x40000001;

/// TPM handle for the endorsement hierarchy
pub const TPM_RH_ENDORSEMENT: u32 = 0x4000000B;

/// Password authorization session handle
pub const TPM_RS_PW: u32 = 0x40000009;

/// First and last handle of the owner persistent range
pub const TPM_PERSISTENT_FIRST: u32 = 0x81000000;
pub const TPM_PERSISTENT_LAST: u32 = 0x81FFFFFF;

/// TPM capability types
pub const TPM_CAP_HANDLES: u32 = 0x00000001;

/// ECC curve identifiers
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmEccCurve {
    NistP256 = 0x0003,
}

/// Object attributes (TPMA_OBJECT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectAttributes(u32);

impl ObjectAttributes {
    pub const FIXED_TPM: u32 = 1 << 1;
    pub const FIXED_PARENT: u32 = 1 << 4;
    pub const SENSITIVE_DATA_ORIGIN: u32 = 1 << 5;
    pub const USER_WITH_AUTH: u32 = 1 << 6;
    pub const ADMIN_WITH_POLICY: u32 = 1 << 7;
    pub const RESTRICTED: u32 = 1 << 16;
    pub const DECRYPT: u32 = 1 << 17;
    pub const SIGN_ENCRYPT: u32 = 1 << 18;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn fixed_tpm(mut self) -> Self {
        self.0 |= Self::FIXED_TPM;
        self
    }

    pub fn fixed_parent(mut self) -> Self {
        self.0 |= Self::FIXED_PARENT;
        self
    }

    pub fn sensitive_data_origin(mut self) -> Self {
        self.0 |= Self::SENSITIVE_DATA_ORIGIN;
        self
    }

    pub fn admin_with_policy(mut self) -> Self {
        self.0 |= Self::ADMIN_WITH_POLICY;
        self
    }

    pub fn restricted(mut self) -> Self {
        self.0 |= Self::RESTRICTED;
        self
    }

    pub fn decrypt(mut self) -> Self {
        self.0 |= Self::DECRYPT;
        self
    }

    pub fn contains(&self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// TPM 2.0 command header
#[derive(Debug)]
struct TpmCommandHeader {
    tag: TpmSt,
    size: u32,
    code: TpmCc,
}

impl TpmCommandHeader {
    fn new(tag: TpmSt, size: u32, code: TpmCc) -> Self {
        Self { tag, size, code }
    }

    fn to_bytes(&self) -> [u8; 10] {
        let mut bytes = [0u8; 10];
        bytes[0..2].copy_from_slice(&(self.tag as u16).to_be_bytes());
        bytes[2..6].copy_from_slice(&self.size.to_be_bytes());
        bytes[6..10].copy_from_slice(&(self.code as u32).to_be_bytes());
        bytes
    }
}

/// TPM 2.0 response header
#[derive(Debug)]
pub struct TpmResponseHeader {
    pub tag: u16,
    pub size: u32,
    pub code: u32,
}

impl TpmResponseHeader {
    /// Parse a response header from a 10-byte buffer
    fn from_bytes(bytes: &[u8; 10]) -> Self {
        let tag = u16::from_be_bytes([bytes[0], bytes[1]]);
        let size = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let code = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        Self { tag, size, code }
    }
}

/// Helper for building TPM commands with big-endian serialization
pub(crate) struct CommandBuffer {
    data: Vec<u8>,
}

impl CommandBuffer {
    pub(crate) fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub(crate) fn write_u8(mut self, val: u8) -> Self {
        self.data.push(val);
        self
    }

    pub(crate) fn write_u16(mut self, val: u16) -> Self {
        self.data.extend_from_slice(&val.to_be_bytes());
        self
    }

    pub(crate) fn write_u32(mut self, val: u32) -> Self {
        self.data.extend_from_slice(&val.to_be_bytes());
        self
    }

    /// Write a TPM2B (size-prefixed buffer)
    pub(crate) fn write_tpm2b(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        self.data.extend_from_slice(bytes);
        self
    }

    /// Authorization area holding a single password session
    fn write_password_auth(self, password: &[u8]) -> Self {
        // sessionHandle (4) + nonce (2) + attributes (1) + hmac size (2) + hmac
        let auth_size = 9 + password.len() as u32;
        self.write_u32(auth_size)
            .write_u32(TPM_RS_PW)
            .write_u16(0) // nonce - empty
            .write_u8(0) // sessionAttributes
            .write_tpm2b(password)
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn finalize(mut self, tag: TpmSt, code: TpmCc) -> Vec<u8> {
        let total_size = 10 + self.data.len(); // header is 10 bytes
        let header = TpmCommandHeader::new(tag, total_size as u32, code);
        let mut result = Vec::with_capacity(total_size);
        result.extend_from_slice(&header.to_bytes());
        result.append(&mut self.data);
        result
    }
}

/// Helper for parsing TPM responses
pub struct ResponseBuffer {
    data: Vec<u8>,
    offset: usize,
}

impl ResponseBuffer {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        if self.offset >= self.data.len() {
            return Err(TpmError::Malformed("Response buffer underflow".into()));
        }
        let val = self.data[self.offset];
        self.offset += 1;
        Ok(val)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        if self.offset + len > self.data.len() {
            return Err(TpmError::Malformed(format!(
                "Response buffer underflow: trying to read {} bytes at offset {}, but only {} bytes total (remaining: {})",
                len,
                self.offset,
                self.data.len(),
                self.remaining()
            )));
        }
        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    /// Read a TPM2B (size-prefixed buffer)
    pub(crate) fn read_tpm2b(&mut self) -> Result<Vec<u8>> {
        let size = self.read_u16()? as usize;
        Ok(self.read_bytes(size)?.to_vec())
    }

    /// Read an algorithm identifier, rejecting values this crate does not model
    pub(crate) fn read_alg(&mut self) -> Result<TpmAlg> {
        let raw = self.read_u16()?;
        TpmAlg::from_u16(raw)
            .ok_or_else(|| TpmError::Malformed(format!("Unknown algorithm: 0x{:04X}", raw)))
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }
}

/// Result from creating a primary key
#[derive(Debug, Clone)]
pub struct CreatePrimaryResult {
    /// Transient handle of the new object
    pub handle: u32,
    /// Marshalled TPMT_PUBLIC exactly as returned by the TPM
    pub public_area: Vec<u8>,
}

/// TPM 2.0 device context
///
/// Generic over the transport so the command encoding can be exercised
/// against an in-memory device.
pub struct Tpm<D = File> {
    device: D,
}

impl Tpm<File> {
    /// Open the TPM device (defaults to /dev/tpmrm0)
    pub fn open() -> Result<Self> {
        Self::open_path(DEFAULT_DEVICE)
    }

    /// Open a specific TPM device path
    pub fn open_path(path: &str) -> Result<Self> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TpmError::io(format!("Failed to open TPM device at {}", path), e))?;

        Ok(Self { device })
    }
}

impl<D: Read + Write> Tpm<D> {
    /// Wrap an already opened transport
    pub fn with_device(device: D) -> Self {
        Self { device }
    }

    /// Send a command and receive response
    ///
    /// Returns a ResponseBuffer containing the response body (without the header)
    pub(crate) fn transmit(&mut self, code: TpmCc, command: &[u8]) -> Result<ResponseBuffer> {
        debug!(command = ?code, len = command.len(), "sending TPM command");

        self.device
            .write_all(command)
            .map_err(|e| TpmError::io("Failed to write TPM command", e))?;

        let mut header_buf = [0u8; 10];
        self.device
            .read_exact(&mut header_buf)
            .map_err(|e| TpmError::io("Failed to read TPM response header", e))?;

        let header = TpmResponseHeader::from_bytes(&header_buf);

        if header.size < 10 {
            return Err(TpmError::Malformed(format!(
                "Invalid TPM response size: {}",
                header.size
            )));
        }

        let body_size = header.size as usize - 10;
        let mut body = vec![0u8; body_size];
        self.device
            .read_exact(&mut body)
            .map_err(|e| TpmError::io("Failed to read TPM response body", e))?;

        if header.code != TpmRc::Success as u32 {
            return Err(TpmError::ResponseCode {
                command: code,
                code: header.code,
            });
        }

        Ok(ResponseBuffer::new(body))
    }

    /// Flush a context (close a handle)
    pub fn flush_context(&mut self, handle: u32) -> Result<()> {
        let command = CommandBuffer::new()
            .write_u32(handle)
            .finalize(TpmSt::NoSessions, TpmCc::FlushContext);
        self.transmit(TpmCc::FlushContext, &command)?;

        Ok(())
    }

    /// Execute TPM2_GetCapability
    ///
    /// Returns (more_data, ResponseBuffer) positioned after capability verification.
    /// The ResponseBuffer is ready to parse capability-specific data.
    pub fn get_capability(
        &mut self,
        capability: u32,
        property: u32,
        property_count: u32,
    ) -> Result<(bool, ResponseBuffer)> {
        let command = CommandBuffer::new()
            .write_u32(capability)
            .write_u32(property)
            .write_u32(property_count)
            .finalize(TpmSt::NoSessions, TpmCc::GetCapability);
        let mut resp = self.transmit(TpmCc::GetCapability, &command)?;

        let more_data = resp.read_u8()? != 0;
        let returned_capability = resp.read_u32()?;
        if returned_capability != capability {
            return Err(TpmError::Malformed(format!(
                "Unexpected capability type: 0x{:08X} (expected 0x{:08X})",
                returned_capability, capability
            )));
        }

        Ok((more_data, resp))
    }

    /// Create a primary object in the session's hierarchy from a full template
    ///
    /// `user_auth` becomes the object's authValue (TPM2B_SENSITIVE_CREATE.userAuth).
    pub fn create_primary(
        &mut self,
        session: &PasswordSession,
        template: &PublicArea,
        user_auth: &[u8],
    ) -> Result<CreatePrimaryResult> {
        if user_auth.len() > MAX_AUTH_SIZE {
            return Err(TpmError::AuthTooLarge {
                len: user_auth.len(),
                max: MAX_AUTH_SIZE,
            });
        }
        let public_area = template.marshal();

        // TPM2B_SENSITIVE_CREATE: userAuth (TPM2B) + data (TPM2B, empty)
        let sensitive_size = (2 + user_auth.len() + 2) as u16;

        let command = CommandBuffer::new()
            .write_u32(session.hierarchy().handle())
            .write_password_auth(session.auth_value())
            .write_u16(sensitive_size)
            .write_tpm2b(user_auth)
            .write_u16(0) // data size = 0
            // inPublic (TPM2B_PUBLIC)
            .write_tpm2b(&public_area)
            // outsideInfo (TPM2B_DATA) - empty
            .write_u16(0)
            // creationPCR (TPML_PCR_SELECTION) - empty
            .write_u32(0)
            .finalize(TpmSt::Sessions, TpmCc::CreatePrimary);
        let mut resp = self.transmit(TpmCc::CreatePrimary, &command)?;

        // Response structure: handle, then parameterSize (when using sessions)
        let handle = resp.read_u32()?;
        let parameter_size = resp.read_u32()?;
        let param_start = resp.offset();

        let public_area = resp.read_tpm2b()?;

        // Skip remaining CreatePrimary output parameters:
        // creationData, creationHash, creationTicket, name
        let bytes_read = resp.offset() - param_start;
        if bytes_read < parameter_size as usize {
            resp.read_bytes(parameter_size as usize - bytes_read)?;
        }

        let final_bytes_read = resp.offset() - param_start;
        if final_bytes_read != parameter_size as usize {
            return Err(TpmError::Malformed(format!(
                "Parameter size mismatch: TPM said {} bytes, we read {} bytes",
                parameter_size, final_bytes_read
            )));
        }

        Ok(CreatePrimaryResult {
            handle,
            public_area,
        })
    }

    /// Make a transient object persistent at `persistent_handle`
    ///
    /// The session must authorize the owner (or platform) hierarchy.
    pub fn evict_control(
        &mut self,
        session: &PasswordSession,
        object_handle: u32,
        persistent_handle: u32,
    ) -> Result<u32> {
        let command = CommandBuffer::new()
            .write_u32(session.hierarchy().handle())
            .write_u32(object_handle)
            .write_password_auth(session.auth_value())
            .write_u32(persistent_handle)
            .finalize(TpmSt::Sessions, TpmCc::EvictControl);
        self.transmit(TpmCc::EvictControl, &command)?;

        Ok(persistent_handle)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    /// In-memory device: records written commands, replays queued responses
    #[derive(Default)]
    pub(crate) struct ScriptedDevice {
        pub written: Vec<Vec<u8>>,
        responses: VecDeque<u8>,
    }

    impl ScriptedDevice {
        pub(crate) fn respond(&mut self, code: u32, body: &[u8]) {
            let size = 10 + body.len() as u32;
            self.responses.extend(0x8001u16.to_be_bytes());
            self.responses.extend(size.to_be_bytes());
            self.responses.extend(code.to_be_bytes());
            self.responses.extend(body.iter().copied());
        }
    }

    impl Read for ScriptedDevice {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.responses.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.responses.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    impl Write for ScriptedDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
