//! The keyed counter-mode generator underlying Fortuna

use zeroize::{Zeroize, Zeroizing};

use crate::cipher::{BlockCipher, NewCipher};
use crate::sha256d::Sha256d;

/// Generator key size in bytes, fixed by the double-SHA-256 rekeying.
pub const KEY_SIZE: usize = 32;

/// Number of blocks produced under a single key before the generator
/// rekeys itself.
const MAX_BLOCKS_PER_KEY: usize = 1 << 16;

/// A keyed counter-mode PRNG with periodic rekeying.
///
/// The generator holds a 32-byte key and a 16-byte block counter and
/// produces output by encrypting successive counter values, drawing a
/// fresh key from its own output after every batch of at most 2^16
/// blocks. A freshly constructed generator is unseeded and refuses to
/// produce output until the first [`reseed`](Self::reseed). Not safe for
/// concurrent use; shared callers go through the
/// [`Accumulator`](crate::Accumulator) instead.
pub struct Generator {
    new_cipher: NewCipher,
    key: Zeroizing<[u8; KEY_SIZE]>,
    cipher: Box<dyn BlockCipher>,
    counter: Zeroizing<Vec<u8>>,
}

impl Generator {
    /// Create an unseeded generator over the given cipher factory. The
    /// key and counter start at zero; output is refused until the first
    /// reseed.
    pub fn new(new_cipher: NewCipher) -> Self {
        let key = Zeroizing::new([0u8; KEY_SIZE]);
        let cipher = new_cipher(&*key).expect("block cipher rejected the generator key size");
        let counter = Zeroizing::new(vec![0u8; cipher.block_size()]);
        Self {
            new_cipher,
            key,
            cipher,
            counter,
        }
    }

    /// Revert to the unseeded state, wiping the key. A new seed must be
    /// supplied before output can be drawn again.
    pub fn reset(&mut self) {
        self.set_key([0u8; KEY_SIZE]);
        self.counter.fill(0);
    }

    fn set_key(&mut self, key: [u8; KEY_SIZE]) {
        // Overwriting the array replaces the previous key material in
        // place; Zeroizing wipes the final key on drop.
        self.cipher =
            (self.new_cipher)(&key).expect("block cipher rejected the generator key size");
        *self.key = key;
    }

    /// The counter is stored least-significant byte first.
    fn inc_counter(&mut self) {
        for b in self.counter.iter_mut() {
            *b = b.wrapping_add(1);
            if *b != 0 {
                break;
            }
        }
    }

    fn seeded(&self) -> bool {
        self.counter.iter().any(|&b| b != 0)
    }

    /// Fold `seed` into the generator state: the new key is the double
    /// SHA-256 of the old key followed by the seed, and the counter is
    /// incremented so the first post-reseed block differs from any block
    /// produced before. Knowledge of the new key does not reveal keys
    /// used earlier.
    pub fn reseed(&mut self, seed: &[u8]) {
        let mut hash = Sha256d::new();
        hash.update(&*self.key);
        hash.update(seed);
        self.set_key(hash.sum());
        self.inc_counter();
        tracing::debug!("generator reseeded");
    }

    /// Discard all state and seed deterministically from an integer.
    /// Only useful for tests and simulations; reproducible output defeats
    /// the purpose of a cryptographic generator.
    pub fn seed_from_int(&mut self, seed: i64) {
        self.reset();
        self.reseed(&seed.to_be_bytes());
    }

    /// Append `count` encrypted counter blocks to `out`.
    ///
    /// Panics if the generator has not been seeded.
    fn generate_blocks(&mut self, count: usize, out: &mut Vec<u8>) {
        assert!(self.seeded(), "fortuna generator used before seeding");

        let block_size = self.cipher.block_size();
        let mut block = Zeroizing::new(vec![0u8; block_size]);
        for _ in 0..count {
            self.cipher.encrypt_block(&mut block, &self.counter);
            out.extend_from_slice(&block);
            self.inc_counter();
        }
    }

    /// Return exactly `n` pseudo-random bytes.
    ///
    /// Output is produced in batches of at most 2^16 blocks; after each
    /// batch the generator replaces its key with freshly generated
    /// output, bounding how much data any single key ever touches.
    ///
    /// Panics if `n > 0` and the generator has not been seeded.
    pub fn pseudo_random_data(&mut self, n: usize) -> Vec<u8> {
        let block_size = self.cipher.block_size();
        let mut remaining = (n + block_size - 1) / block_size;
        let mut out = Vec::with_capacity(remaining * block_size);

        while remaining > 0 {
            let count = remaining.min(MAX_BLOCKS_PER_KEY);
            self.generate_blocks(count, &mut out);
            remaining -= count;

            let key_blocks = (KEY_SIZE + block_size - 1) / block_size;
            let mut key_material = Vec::with_capacity(key_blocks * block_size);
            self.generate_blocks(key_blocks, &mut key_material);

            let mut new_key = [0u8; KEY_SIZE];
            new_key.copy_from_slice(&key_material[..KEY_SIZE]);
            key_material.zeroize();
            self.set_key(new_key);
        }

        out.truncate(n);
        out
    }

    /// A uniformly distributed integer in `0..=i64::MAX`: eight output
    /// bytes with the top bit cleared, interpreted big-endian.
    pub fn int63(&mut self) -> i64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.pseudo_random_data(8));
        buf[0] &= 0x7f;
        i64::from_be_bytes(buf)
    }

    /// Eight raw output bytes interpreted as a big-endian unsigned
    /// integer.
    pub fn uint64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.pseudo_random_data(8));
        u64::from_be_bytes(buf)
    }
}
