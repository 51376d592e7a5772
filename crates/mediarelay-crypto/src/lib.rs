//! Cryptographic operations for CDN-redirected media downloads
//!
//! When the origin data center redirects a download to a CDN node, the CDN
//! serves blocks encrypted with a per-file key and IV, and the origin publishes
//! SHA-256 hashes for fixed-size segments of the plaintext. This crate holds
//! both halves of that contract.
//!
//! # Components
//!
//! - **Decryption**: AES-256-CTR with an IV derived from the block offset
//! - **Verification**: SHA-256 comparison of plaintext segments against the
//!   hashes announced by the origin
//!
//! # Examples
//!
//! ```
//! use mediarelay_crypto::{CdnCipher, FileHash, verify_segments};
//!
//! let cipher = CdnCipher::new(&[7u8; 32], &[9u8; 16]).expect("valid key material");
//! let plaintext = b"one block of media".to_vec();
//! let ciphertext = cipher.encrypt(0, &plaintext).expect("offset fits");
//! assert_eq!(cipher.decrypt(0, &ciphertext).expect("offset fits"), plaintext);
//!
//! let hashes = vec![FileHash::for_segment(0, &plaintext)];
//! verify_segments(&plaintext, &hashes).expect("hashes match");
//! ```

#![warn(missing_docs)]

pub mod block;
pub mod error;
pub mod hashes;

pub use block::{CdnCipher, IV_SIZE, KEY_SIZE};
pub use error::CryptoError;
pub use hashes::{FileHash, sha256, verify_segments};
