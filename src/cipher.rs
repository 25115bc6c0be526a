//! Block cipher abstraction for the generator.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;

pub use aes::cipher::InvalidLength;

/// A keyed block cipher able to encrypt one block at a time. The
/// generator only needs raw single-block encryption, so any cipher with
/// a 16-byte block and a 32-byte key can stand in for the default
/// AES-256 binding.
pub trait BlockCipher: Send {
    /// Cipher block size in bytes.
    fn block_size(&self) -> usize;

    /// Encrypt the single block in `src` into `dst`. Both slices must be
    /// exactly [`block_size`](Self::block_size) bytes long.
    fn encrypt_block(&self, dst: &mut [u8], src: &[u8]);
}

/// Factory allocating a block cipher for a given key, typically
/// [`new_aes256`]. Returns an error if the key length does not fit the
/// cipher.
pub type NewCipher = fn(&[u8]) -> Result<Box<dyn BlockCipher>, InvalidLength>;

struct Aes256Block(Aes256);

impl BlockCipher for Aes256Block {
    fn block_size(&self) -> usize {
        16
    }

    fn encrypt_block(&self, dst: &mut [u8], src: &[u8]) {
        let src = GenericArray::from_slice(src);
        let dst = GenericArray::from_mut_slice(dst);
        self.0.encrypt_block_b2b(src, dst);
    }
}

/// Allocate an AES-256 block cipher for a 32-byte key. This is the
/// default binding used by the generator and the accumulator.
pub fn new_aes256(key: &[u8]) -> Result<Box<dyn BlockCipher>, InvalidLength> {
    Ok(Box::new(Aes256Block(Aes256::new_from_slice(key)?)))
}
