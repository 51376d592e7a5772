//! SHA-256 verification of decrypted CDN blocks
//!
//! The origin publishes one hash per fixed-size segment of a file. A
//! downloaded block is split into `limit`-sized slices in the order the hashes
//! were returned, and every slice must hash to its announced value.

use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Hash announced by the origin for one segment of a CDN file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    /// Offset of the segment within the file
    pub offset: u64,
    /// Segment length in bytes
    pub limit: u32,
    /// SHA-256 of the segment plaintext
    pub hash: Vec<u8>,
}

impl FileHash {
    /// Build the hash entry describing `data` at `offset`
    pub fn for_segment(offset: u64, data: &[u8]) -> Self {
        Self {
            offset,
            limit: u32::try_from(data.len()).unwrap_or(u32::MAX),
            hash: sha256(data).to_vec(),
        }
    }
}

/// Compute the SHA-256 digest of `data`
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Verify a decrypted block against the hashes announced for its offset
///
/// Segment `i` covers `block[limit * i .. limit * (i + 1)]`, clamped to the
/// block length. Any mismatch is fatal: the block cannot be trusted.
pub fn verify_segments(block: &[u8], hashes: &[FileHash]) -> Result<(), CryptoError> {
    for (segment, expected) in hashes.iter().enumerate() {
        let limit = expected.limit as usize;
        let start = limit.saturating_mul(segment).min(block.len());
        let end = limit.saturating_mul(segment + 1).min(block.len());

        let actual = sha256(&block[start..end]);
        if actual.as_slice() != expected.hash.as_slice() {
            return Err(CryptoError::HashMismatch {
                segment,
                offset: expected.offset,
                expected: hex::encode(&expected.hash),
                actual: hex::encode(actual),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn segment_hashes(data: &[u8], limit: usize) -> Vec<FileHash> {
        data.chunks(limit)
            .enumerate()
            .map(|(i, chunk)| FileHash {
                offset: (i * limit) as u64,
                limit: limit as u32,
                hash: sha256(chunk).to_vec(),
            })
            .collect()
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_all_segments() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let hashes = segment_hashes(&data, 4096);
        assert_eq!(hashes.len(), 3);

        verify_segments(&data, &hashes).expect("Operation should succeed");
    }

    #[test]
    fn test_verify_detects_flipped_byte() {
        let mut data = vec![0x5au8; 8192];
        let hashes = segment_hashes(&data, 4096);
        data[5000] ^= 0xff;

        let err = verify_segments(&data, &hashes).expect_err("Test operation should fail");
        match err {
            CryptoError::HashMismatch {
                segment, offset, ..
            } => {
                assert_eq!(segment, 1);
                assert_eq!(offset, 4096);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_verify_short_block_against_extra_hash() {
        // A hash announced past the end of the block covers an empty slice and fails
        let data = vec![1u8; 4096];
        let mut hashes = segment_hashes(&data, 4096);
        hashes.push(FileHash::for_segment(4096, &[2u8; 4096]));

        assert!(verify_segments(&data, &hashes).is_err());
    }

    #[test]
    fn test_verify_empty_hash_list() {
        verify_segments(b"anything", &[]).expect("Operation should succeed");
    }

    proptest! {
        #[test]
        fn prop_segment_hashes_always_verify(
            data in proptest::collection::vec(any::<u8>(), 1..20_000),
            limit in 1usize..8192,
        ) {
            let hashes = segment_hashes(&data, limit);
            prop_assert!(verify_segments(&data, &hashes).is_ok());
        }
    }
}
