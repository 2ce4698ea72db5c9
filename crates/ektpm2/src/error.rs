// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for TPM communication

use thiserror::Error;

use crate::TpmCc;

/// Errors raised while talking to the TPM or decoding its structures
#[derive(Debug, Error)]
pub enum TpmError {
    /// Reading from or writing to the device node failed
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The TPM answered with a non-success response code
    #[error("TPM2_{command:?} failed with code: 0x{code:08X}")]
    ResponseCode { command: TpmCc, code: u32 },

    /// A response or serialized structure did not parse
    #[error("malformed TPM data: {0}")]
    Malformed(String),

    /// Authorization values are limited to the size of a SHA-512 digest
    #[error("authorization value is {len} bytes, maximum is {max}")]
    AuthTooLarge { len: usize, max: usize },
}

impl TpmError {
    /// The raw `TPM_RC` if the TPM itself rejected the command
    pub fn response_code(&self) -> Option<u32> {
        match self {
            TpmError::ResponseCode { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TpmError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TpmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_code_display() {
        let err = TpmError::ResponseCode {
            command: TpmCc::EvictControl,
            code: 0x14C,
        };
        assert_eq!(err.to_string(), "TPM2_EvictControl failed with code: 0x0000014C");
        assert_eq!(err.response_code(), Some(0x14C));
    }

    #[test]
    fn test_malformed_has_no_code() {
        let err = TpmError::Malformed("short".into());
        assert_eq!(err.response_code(), None);
    }
}
