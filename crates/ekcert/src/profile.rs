// SPDX-License-Identifier: MIT OR Apache-2.0

//! Constants published by the TCG EK Credential Profile
//!
//! These values are fixed by the profile and by what manufacturer
//! certificate services expect. They are never derived at runtime.

/// TCG EK Credential Profile for TPM Family 2.0, template "L-1" (RSA 2048 /
/// ECC P-256 low range)
pub mod v2 {
    /// Profile revision these constants were taken from
    pub const PROFILE_VERSION: &str = "2.0";

    /// authPolicy of every low-range EK template:
    /// PolicySecret(TPM_RH_ENDORSEMENT) computed with SHA-256
    pub const EK_AUTH_POLICY_SHA256: [u8; 32] = [
        0x83, 0x71, 0x97, 0x67, 0x44, 0x84, 0xB3, 0xF8, 0x1A, 0x90, 0xCC, 0x8D, 0x46, 0xA5, 0xD7,
        0x24, 0xFD, 0x52, 0xD7, 0x6E, 0x06, 0x52, 0x0B, 0x64, 0xF2, 0xA1, 0xDA, 0x1B, 0x33, 0x14,
        0x69, 0xAA,
    ];

    /// Public exponent 65537, big-endian without leading zeros, appended to
    /// the RSA modulus when hashing an EK for certificate lookup
    pub const EK_FINGERPRINT_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

    /// Size of the zero-filled RSA modulus placeholder in the template
    pub const RSA_UNIQUE_SIZE: usize = 256;

    /// Size of each zero-filled ECC coordinate placeholder in the template
    pub const ECC_UNIQUE_SIZE: usize = 32;
}
