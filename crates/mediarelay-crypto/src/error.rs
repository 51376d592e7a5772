//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur while decrypting or verifying CDN blocks
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key size
    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected key size in bytes
        expected: usize,
        /// Actual key size in bytes
        actual: usize,
    },

    /// Invalid IV size
    #[error("Invalid IV size: expected {expected}, got {actual}")]
    InvalidIvSize {
        /// Expected IV size in bytes
        expected: usize,
        /// Actual IV size in bytes
        actual: usize,
    },

    /// Block offset does not fit in the 32-bit IV counter
    #[error("Offset {offset} exceeds the addressable CTR range")]
    OffsetOutOfRange {
        /// Offset that was requested
        offset: u64,
    },

    /// A plaintext segment did not hash to the announced value
    #[error("CDN hash mismatch for segment {segment} at offset {offset}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Position of the segment within the hash list
        segment: usize,
        /// Offset announced for the segment
        offset: u64,
        /// Announced hash, hex encoded
        expected: String,
        /// Computed hash, hex encoded
        actual: String,
    },
}
