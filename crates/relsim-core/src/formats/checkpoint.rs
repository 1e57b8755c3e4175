//! # Checkpoint Format
//!
//! Binary serialization for engine snapshots.
//!
//! Format: Header (5 bytes) + postcard-serialized [`Checkpoint`].
//! - 4 bytes: Magic ("RSIM")
//! - 1 byte: Version
//!
//! Size limits and the header are validated before the payload is parsed,
//! so corrupted or hostile input fails without a large allocation.

use crate::engine::Checkpoint;
use crate::{RelsimError, primitives};

/// Maximum accepted blob size.
pub const MAX_CHECKPOINT_SIZE: usize = 1024 * 1024 * 1024; // 1 GiB

const HEADER_LEN: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header that precedes every checkpoint payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl CheckpointHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), RelsimError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(RelsimError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(RelsimError::DeserializationError(format!(
                "Unsupported checkpoint version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RelsimError> {
        let Some(head) = bytes.get(..HEADER_LEN) else {
            return Err(RelsimError::DeserializationError(
                "Header too short".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&head[..4]);
        Ok(Self {
            magic,
            version: head[4],
        })
    }
}

impl Default for CheckpointHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a checkpoint (header + payload).
pub fn checkpoint_to_bytes(checkpoint: &Checkpoint) -> Result<Vec<u8>, RelsimError> {
    let payload = postcard::to_stdvec(checkpoint)
        .map_err(|e| RelsimError::SerializationError(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&CheckpointHeader::new().to_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Deserialize a checkpoint.
///
/// Checks, in order: minimum size, maximum size, header. Only then is the
/// payload parsed. Structural validation of the arrays happens later, in
/// `CayleyEngine::restore`.
pub fn checkpoint_from_bytes(bytes: &[u8]) -> Result<Checkpoint, RelsimError> {
    if bytes.len() < HEADER_LEN {
        return Err(RelsimError::DeserializationError(format!(
            "Data too short: minimum {HEADER_LEN} bytes required"
        )));
    }
    if bytes.len() > MAX_CHECKPOINT_SIZE {
        return Err(RelsimError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_CHECKPOINT_SIZE
        )));
    }

    CheckpointHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
        RelsimError::DeserializationError(format!("Failed to deserialize checkpoint: {e}"))
    })
}

/// BLAKE3 hex digest of a serialized checkpoint.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn checkpoint_checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

// =============================================================================
// TESTS
// =============================================================================
