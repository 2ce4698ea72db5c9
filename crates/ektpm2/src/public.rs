// SPDX-License-Identifier: MIT OR Apache-2.0

//! TPMT_PUBLIC / TPM2B_PUBLIC structures
//!
//! Used both as the CreatePrimary template and as the on-disk format of a
//! saved public key (a marshalled TPM2B_PUBLIC, as tpm2-tools writes it).

use crate::error::{Result, TpmError};
use crate::{CommandBuffer, ObjectAttributes, ResponseBuffer, TpmAlg};

/// TPMT_SYM_DEF_OBJECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymDef {
    pub algorithm: TpmAlg,
    pub key_bits: u16,
    pub mode: TpmAlg,
}

impl SymDef {
    pub const NULL: SymDef = SymDef {
        algorithm: TpmAlg::Null,
        key_bits: 0,
        mode: TpmAlg::Null,
    };

    pub fn aes_128_cfb() -> Self {
        Self {
            algorithm: TpmAlg::Aes,
            key_bits: 128,
            mode: TpmAlg::Cfb,
        }
    }

    fn marshal(&self, buf: CommandBuffer) -> CommandBuffer {
        let buf = buf.write_u16(self.algorithm as u16);
        if self.algorithm == TpmAlg::Null {
            return buf;
        }
        buf.write_u16(self.key_bits).write_u16(self.mode as u16)
    }

    fn unmarshal(resp: &mut ResponseBuffer) -> Result<Self> {
        let algorithm = resp.read_alg()?;
        if algorithm == TpmAlg::Null {
            return Ok(Self::NULL);
        }
        Ok(Self {
            algorithm,
            key_bits: resp.read_u16()?,
            mode: resp.read_alg()?,
        })
    }
}

/// Signing/encryption/KDF scheme with an optional hash detail
///
/// Covers TPMT_RSA_SCHEME, TPMT_ECC_SCHEME and TPMT_KDF_SCHEME. Every
/// scheme except NULL and RSAES carries a hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgScheme {
    pub scheme: TpmAlg,
    pub hash_alg: Option<TpmAlg>,
}

impl AlgScheme {
    pub const NULL: AlgScheme = AlgScheme {
        scheme: TpmAlg::Null,
        hash_alg: None,
    };

    fn marshal(&self, buf: CommandBuffer) -> CommandBuffer {
        let buf = buf.write_u16(self.scheme as u16);
        match self.hash_alg {
            Some(hash) => buf.write_u16(hash as u16),
            None => buf,
        }
    }

    fn unmarshal(resp: &mut ResponseBuffer) -> Result<Self> {
        let scheme = resp.read_alg()?;
        let hash_alg = match scheme {
            TpmAlg::Null | TpmAlg::RsaEs => None,
            _ => Some(resp.read_alg()?),
        };
        Ok(Self { scheme, hash_alg })
    }
}

/// TPMT_KEYEDHASH_SCHEME
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyedHashScheme {
    Null,
    Hmac { hash_alg: TpmAlg },
    Xor { hash_alg: TpmAlg, kdf: TpmAlg },
}

impl KeyedHashScheme {
    fn marshal(&self, buf: CommandBuffer) -> CommandBuffer {
        match self {
            KeyedHashScheme::Null => buf.write_u16(TpmAlg::Null as u16),
            KeyedHashScheme::Hmac { hash_alg } => buf
                .write_u16(TpmAlg::Hmac as u16)
                .write_u16(*hash_alg as u16),
            KeyedHashScheme::Xor { hash_alg, kdf } => buf
                .write_u16(TpmAlg::Xor as u16)
                .write_u16(*hash_alg as u16)
                .write_u16(*kdf as u16),
        }
    }

    fn unmarshal(resp: &mut ResponseBuffer) -> Result<Self> {
        match resp.read_alg()? {
            TpmAlg::Null => Ok(KeyedHashScheme::Null),
            TpmAlg::Hmac => Ok(KeyedHashScheme::Hmac {
                hash_alg: resp.read_alg()?,
            }),
            TpmAlg::Xor => Ok(KeyedHashScheme::Xor {
                hash_alg: resp.read_alg()?,
                kdf: resp.read_alg()?,
            }),
            other => Err(TpmError::Malformed(format!(
                "Invalid keyed-hash scheme: {}",
                other.name()
            ))),
        }
    }
}

/// TPMU_PUBLIC_PARMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicParms {
    Rsa {
        symmetric: SymDef,
        scheme: AlgScheme,
        key_bits: u16,
        /// 0 selects the default exponent 2^16 + 1
        exponent: u32,
    },
    KeyedHash {
        scheme: KeyedHashScheme,
    },
    Ecc {
        symmetric: SymDef,
        scheme: AlgScheme,
        curve_id: u16,
        kdf: AlgScheme,
    },
    SymCipher {
        symmetric: SymDef,
    },
}

/// TPMU_PUBLIC_ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicId {
    /// RSA modulus
    Rsa(Vec<u8>),
    KeyedHash(Vec<u8>),
    Ecc { x: Vec<u8>, y: Vec<u8> },
    SymCipher(Vec<u8>),
}

/// TPMT_PUBLIC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicArea {
    pub object_type: TpmAlg,
    pub name_alg: TpmAlg,
    pub object_attributes: ObjectAttributes,
    pub auth_policy: Vec<u8>,
    pub parameters: PublicParms,
    pub unique: PublicId,
}

impl PublicArea {
    /// Serialize as TPMT_PUBLIC
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = CommandBuffer::new()
            .write_u16(self.object_type as u16)
            .write_u16(self.name_alg as u16)
            .write_u32(self.object_attributes.value())
            .write_tpm2b(&self.auth_policy);

        buf = match &self.parameters {
            PublicParms::Rsa {
                symmetric,
                scheme,
                key_bits,
                exponent,
            } => {
                let buf = symmetric.marshal(buf);
                scheme.marshal(buf).write_u16(*key_bits).write_u32(*exponent)
            }
            PublicParms::KeyedHash { scheme } => scheme.marshal(buf),
            PublicParms::Ecc {
                symmetric,
                scheme,
                curve_id,
                kdf,
            } => {
                let buf = scheme.marshal(symmetric.marshal(buf)).write_u16(*curve_id);
                kdf.marshal(buf)
            }
            PublicParms::SymCipher { symmetric } => symmetric.marshal(buf),
        };

        buf = match &self.unique {
            PublicId::Rsa(modulus) => buf.write_tpm2b(modulus),
            PublicId::KeyedHash(digest) | PublicId::SymCipher(digest) => buf.write_tpm2b(digest),
            PublicId::Ecc { x, y } => buf.write_tpm2b(x).write_tpm2b(y),
        };

        buf.into_bytes()
    }

    /// Serialize as TPM2B_PUBLIC (size-prefixed)
    pub fn to_tpm2b(&self) -> Vec<u8> {
        let area = self.marshal();
        CommandBuffer::new().write_tpm2b(&area).into_bytes()
    }

    /// Parse a TPMT_PUBLIC, requiring the whole buffer to be consumed
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut resp = ResponseBuffer::new(data.to_vec());
        let area = Self::read(&mut resp)?;
        if resp.remaining() != 0 {
            return Err(TpmError::Malformed(format!(
                "{} trailing bytes after TPMT_PUBLIC",
                resp.remaining()
            )));
        }
        Ok(area)
    }

    /// Parse a TPM2B_PUBLIC
    pub fn from_tpm2b(data: &[u8]) -> Result<Self> {
        let mut resp = ResponseBuffer::new(data.to_vec());
        let inner = resp.read_tpm2b()?;
        if resp.remaining() != 0 {
            return Err(TpmError::Malformed(format!(
                "{} trailing bytes after TPM2B_PUBLIC",
                resp.remaining()
            )));
        }
        Self::unmarshal(&inner)
    }

    fn read(resp: &mut ResponseBuffer) -> Result<Self> {
        let object_type = resp.read_alg()?;
        let name_alg = resp.read_alg()?;
        let object_attributes = ObjectAttributes::from_bits(resp.read_u32()?);
        let auth_policy = resp.read_tpm2b()?;

        let (parameters, unique) = match object_type {
            TpmAlg::Rsa => {
                let symmetric = SymDef::unmarshal(resp)?;
                let scheme = AlgScheme::unmarshal(resp)?;
                let key_bits = resp.read_u16()?;
                let exponent = resp.read_u32()?;
                let modulus = resp.read_tpm2b()?;
                (
                    PublicParms::Rsa {
                        symmetric,
                        scheme,
                        key_bits,
                        exponent,
                    },
                    PublicId::Rsa(modulus),
                )
            }
            TpmAlg::KeyedHash => {
                let scheme = KeyedHashScheme::unmarshal(resp)?;
                (
                    PublicParms::KeyedHash { scheme },
                    PublicId::KeyedHash(resp.read_tpm2b()?),
                )
            }
            TpmAlg::Ecc => {
                let symmetric = SymDef::unmarshal(resp)?;
                let scheme = AlgScheme::unmarshal(resp)?;
                let curve_id = resp.read_u16()?;
                let kdf = AlgScheme::unmarshal(resp)?;
                let x = resp.read_tpm2b()?;
                let y = resp.read_tpm2b()?;
                (
                    PublicParms::Ecc {
                        symmetric,
                        scheme,
                        curve_id,
                        kdf,
                    },
                    PublicId::Ecc { x, y },
                )
            }
            TpmAlg::SymCipher => {
                let symmetric = SymDef::unmarshal(resp)?;
                (
                    PublicParms::SymCipher { symmetric },
                    PublicId::SymCipher(resp.read_tpm2b()?),
                )
            }
            other => {
                return Err(TpmError::Malformed(format!(
                    "Unsupported object type: {}",
                    other.name()
                )))
            }
        };

        Ok(Self {
            object_type,
            name_alg,
            object_attributes,
            auth_policy,
            parameters,
            unique,
        })
    }
}
