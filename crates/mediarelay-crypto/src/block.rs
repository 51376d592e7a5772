//! AES-256-CTR decryption for CDN blocks
//!
//! Every block fetched from a CDN node is encrypted independently. The IV for
//! a block is the file's base IV with its last four bytes replaced by the
//! big-endian encoding of `offset / 16`, so any block can be decrypted without
//! seeing the ones before it.

use aes::Aes256;
use cipher::{KeyIvInit, StreamCipher};

use crate::error::CryptoError;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// CTR IV size in bytes
pub const IV_SIZE: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Key material announced by a CDN redirect
#[derive(Clone)]
pub struct CdnCipher {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl std::fmt::Debug for CdnCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdnCipher")
            .field("key", &"<redacted>")
            .field("iv", &hex::encode(self.iv))
            .finish()
    }
}

impl CdnCipher {
    /// Create a cipher from the redirect's encryption key and base IV
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = key.try_into().map_err(|_| CryptoError::InvalidKeySize {
            expected: KEY_SIZE,
            actual: key.len(),
        })?;
        let iv: [u8; IV_SIZE] = iv.try_into().map_err(|_| CryptoError::InvalidIvSize {
            expected: IV_SIZE,
            actual: iv.len(),
        })?;

        Ok(Self { key, iv })
    }

    /// IV used for the block starting at `offset`
    pub fn iv_for_offset(&self, offset: u64) -> Result<[u8; IV_SIZE], CryptoError> {
        let counter =
            u32::try_from(offset / 16).map_err(|_| CryptoError::OffsetOutOfRange { offset })?;

        let mut iv = self.iv;
        iv[IV_SIZE - 4..].copy_from_slice(&counter.to_be_bytes());
        Ok(iv)
    }

    /// Decrypt the block that starts at `offset`
    pub fn decrypt(&self, offset: u64, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let iv = self.iv_for_offset(offset)?;
        let mut output = data.to_vec();
        let mut cipher = Aes256Ctr::new(&self.key.into(), &iv.into());
        cipher.apply_keystream(&mut output);
        Ok(output)
    }

    /// Encrypt the block that starts at `offset` (same as decrypt for CTR mode)
    pub fn encrypt(&self, offset: u64, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.decrypt(offset, data)
    }
}
