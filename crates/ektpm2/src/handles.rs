// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent handle enumeration

use std::io::{Read, Write};

use tracing::debug;

use crate::error::Result;
use crate::{Tpm, TPM_CAP_HANDLES, TPM_PERSISTENT_FIRST, TPM_PERSISTENT_LAST};

/// Handles requested per GetCapability round trip
const HANDLES_PER_QUERY: u32 = 64;

/// Handle-related TPM operations
pub trait HandleOps {
    /// List every persistent handle currently in use, in ascending order
    fn persistent_handles(&mut self) -> Result<Vec<u32>>;

    /// Lowest unused handle in the owner persistent range, if any
    fn find_vacant_persistent_handle(&mut self) -> Result<Option<u32>> {
        let used = self.persistent_handles()?;
        Ok(first_vacant(&used))
    }
}

impl<D: Read + Write> HandleOps for Tpm<D> {
    fn persistent_handles(&mut self) -> Result<Vec<u32>> {
        let mut handles = Vec::new();
        let mut next = TPM_PERSISTENT_FIRST;

        loop {
            let (more_data, mut resp) = self.get_capability(TPM_CAP_HANDLES, next, HANDLES_PER_QUERY)?;

            // TPML_HANDLE
            let count = resp.read_u32()?;
            let mut last = None;
            for _ in 0..count {
                let handle = resp.read_u32()?;
                if handle > TPM_PERSISTENT_LAST {
                    break;
                }
                handles.push(handle);
                last = Some(handle);
            }

            match last {
                Some(handle) if more_data && handle < TPM_PERSISTENT_LAST => next = handle + 1,
                _ => break,
            }
        }

        debug!(count = handles.len(), "enumerated persistent handles");
        handles.sort_unstable();
        Ok(handles)
    }
}

/// Pick the first handle in the persistent range not present in `used`
///
/// `used` must be sorted ascending.
pub fn first_vacant(used: &[u32]) -> Option<u32> {
    let mut candidate = TPM_PERSISTENT_FIRST;
    for &handle in used {
        if handle < candidate {
            continue;
        }
        if handle > candidate {
            break;
        }
        if candidate == TPM_PERSISTENT_LAST {
            return None;
        }
        candidate += 1;
    }
    Some(candidate)
}
