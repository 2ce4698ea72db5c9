// SPDX-License-Identifier: MIT OR Apache-2.0

//! EK template construction

use ektpm2::{
    AlgScheme, KeyedHashScheme, ObjectAttributes, PublicArea, PublicId, PublicParms, SymDef,
    TpmAlg, TpmEccCurve,
};

use crate::error::ConfigError;
use crate::profile::v2;

/// Object types an EK can be created as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ecc,
    KeyedHash,
    SymCipher,
}

impl KeyAlgorithm {
    pub fn from_alg_id(alg: u16) -> Result<Self, ConfigError> {
        match TpmAlg::from_u16(alg) {
            Some(TpmAlg::Rsa) => Ok(KeyAlgorithm::Rsa),
            Some(TpmAlg::Ecc) => Ok(KeyAlgorithm::Ecc),
            Some(TpmAlg::KeyedHash) => Ok(KeyAlgorithm::KeyedHash),
            Some(TpmAlg::SymCipher) => Ok(KeyAlgorithm::SymCipher),
            _ => Err(ConfigError::UnsupportedAlgorithm(alg)),
        }
    }

    pub fn tpm_alg(&self) -> TpmAlg {
        match self {
            KeyAlgorithm::Rsa => TpmAlg::Rsa,
            KeyAlgorithm::Ecc => TpmAlg::Ecc,
            KeyAlgorithm::KeyedHash => TpmAlg::KeyedHash,
            KeyAlgorithm::SymCipher => TpmAlg::SymCipher,
        }
    }
}

/// Resolve a command-line algorithm to its TPM_ALG_ID
///
/// Accepts any algorithm name known to the TPM layer or a numeric id
/// (`0x1`, `1`). Whether the algorithm can back an EK is decided later by
/// [`ek_template`].
pub fn parse_algorithm(value: &str) -> Result<u16, ConfigError> {
    let value = value.trim();
    if let Some(alg) = TpmAlg::from_name(value) {
        return Ok(alg as u16);
    }
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse::<u16>(),
    };
    parsed.map_err(|_| ConfigError::InvalidAlgorithm(value.to_string()))
}

/// Build the EK template for a TPM_ALG_ID
///
/// Fails with [`ConfigError::UnsupportedAlgorithm`] for anything other than
/// RSA, ECC, keyed-hash or symmetric-cipher objects.
pub fn ek_template(alg: u16) -> Result<PublicArea, ConfigError> {
    KeyAlgorithm::from_alg_id(alg).map(template_for)
}

/// EK template for one of the supported object types
pub fn template_for(algorithm: KeyAlgorithm) -> PublicArea {
    // Restricted decryption key, admin via policy only, never duplicable
    let attributes = ObjectAttributes::new()
        .restricted()
        .admin_with_policy()
        .decrypt()
        .fixed_tpm()
        .fixed_parent()
        .sensitive_data_origin();

    let (parameters, unique) = match algorithm {
        KeyAlgorithm::Rsa => (
            PublicParms::Rsa {
                symmetric: SymDef::aes_128_cfb(),
                scheme: AlgScheme::NULL,
                key_bits: 2048,
                exponent: 0,
            },
            PublicId::Rsa(vec![0; v2::RSA_UNIQUE_SIZE]),
        ),
        KeyAlgorithm::KeyedHash => (
            PublicParms::KeyedHash {
                scheme: KeyedHashScheme::Xor {
                    hash_alg: TpmAlg::Sha256,
                    kdf: TpmAlg::Kdf1Sp800_108,
                },
            },
            PublicId::KeyedHash(Vec::new()),
        ),
        KeyAlgorithm::Ecc => (
            PublicParms::Ecc {
                symmetric: SymDef::aes_128_cfb(),
                scheme: AlgScheme::NULL,
                curve_id: TpmEccCurve::NistP256 as u16,
                kdf: AlgScheme::NULL,
            },
            PublicId::Ecc {
                x: vec![0; v2::ECC_UNIQUE_SIZE],
                y: vec![0; v2::ECC_UNIQUE_SIZE],
            },
        ),
        KeyAlgorithm::SymCipher => (
            PublicParms::SymCipher {
                symmetric: SymDef::aes_128_cfb(),
            },
            PublicId::SymCipher(Vec::new()),
        ),
    };

    PublicArea {
        object_type: algorithm.tpm_alg(),
        name_alg: TpmAlg::Sha256,
        object_attributes: attributes,
        auth_policy: v2::EK_AUTH_POLICY_SHA256.to_vec(),
        parameters,
        unique,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [KeyAlgorithm; 4] = [
        KeyAlgorithm::Rsa,
        KeyAlgorithm::Ecc,
        KeyAlgorithm::KeyedHash,
        KeyAlgorithm::SymCipher,
    ];

    #[test]
    fn test_policy_digest_is_profile_constant() {
        for alg in ALL {
            let template = ek_template(alg.tpm_alg() as u16).unwrap();
            assert_eq!(template.auth_policy, v2::EK_AUTH_POLICY_SHA256, "{:?}", alg);
            assert_eq!(template.name_alg, TpmAlg::Sha256);
            assert_eq!(template.object_type, alg.tpm_alg());
        }
    }

    #[test]
    fn test_shared_attributes() {
        for alg in ALL {
            let attrs = template_for(alg).object_attributes;
            assert_eq!(attrs.value(), 0x000300B2, "{:?}", alg);
            assert!(!attrs.contains(ObjectAttributes::USER_WITH_AUTH));
            assert!(!attrs.contains(ObjectAttributes::SIGN_ENCRYPT));
        }
    }

    #[test]
    fn test_rsa_template() {
        let template = template_for(KeyAlgorithm::Rsa);
        assert_eq!(
            template.parameters,
            PublicParms::Rsa {
                symmetric: SymDef::aes_128_cfb(),
                scheme: AlgScheme::NULL,
                key_bits: 2048,
                exponent: 0,
            }
        );
        assert_eq!(template.unique, PublicId::Rsa(vec![0; 256]));
    }

    #[test]
    fn test_ecc_template() {
        let template = template_for(KeyAlgorithm::Ecc);
        match (&template.parameters, &template.unique) {
            (PublicParms::Ecc { curve_id, kdf, scheme, .. }, PublicId::Ecc { x, y }) => {
                assert_eq!(*curve_id, 0x0003);
                assert_eq!(*kdf, AlgScheme::NULL);
                assert_eq!(*scheme, AlgScheme::NULL);
                assert_eq!((x.len(), y.len()), (32, 32));
            }
            other => panic!("unexpected ECC template: {:?}", other),
        }
    }

    #[test]
    fn test_keyedhash_and_symcipher_templates() {
        let keyed = template_for(KeyAlgorithm::KeyedHash);
        assert_eq!(
            keyed.parameters,
            PublicParms::KeyedHash {
                scheme: KeyedHashScheme::Xor {
                    hash_alg: TpmAlg::Sha256,
                    kdf: TpmAlg::Kdf1Sp800_108,
                }
            }
        );
        assert_eq!(keyed.unique, PublicId::KeyedHash(Vec::new()));

        let sym = template_for(KeyAlgorithm::SymCipher);
        assert_eq!(sym.unique, PublicId::SymCipher(Vec::new()));
    }

    #[test]
    fn test_other_algorithms_rejected() {
        for alg in [TpmAlg::Sha256, TpmAlg::Aes, TpmAlg::Hmac, TpmAlg::Null] {
            assert!(matches!(
                ek_template(alg as u16),
                Err(ConfigError::UnsupportedAlgorithm(id)) if id == alg as u16
            ));
        }
        assert!(matches!(
            ek_template(0x7777),
            Err(ConfigError::UnsupportedAlgorithm(0x7777))
        ));
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(parse_algorithm("rsa").unwrap(), 0x0001);
        assert_eq!(parse_algorithm("ECC").unwrap(), 0x0023);
        assert_eq!(parse_algorithm("0x25").unwrap(), 0x0025);
        assert_eq!(parse_algorithm("8").unwrap(), 0x0008);
        assert_eq!(parse_algorithm("sha256").unwrap(), 0x000B);
        assert!(matches!(
            parse_algorithm("rsa2048"),
            Err(ConfigError::InvalidAlgorithm(_))
        ));
    }
}
