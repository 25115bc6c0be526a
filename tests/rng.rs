use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use fortuna::{
    new_aes256, BlockCipher, FortunaError, Generator, InitialSeedProvider, InvalidLength, Result,
    Rng, SeedStore, SEED_FILE_SIZE,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

fn seed_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("seed")
}

/// Deterministic provider for tests that must not depend on the host.
struct FixedSeed;

impl InitialSeedProvider for FixedSeed {
    fn initial_seed(&self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(vec![0x42u8; 64]))
    }
}

/// Provider standing in for a host with no usable entropy.
struct NoEntropy;

impl InitialSeedProvider for NoEntropy {
    fn initial_seed(&self) -> Result<Zeroizing<Vec<u8>>> {
        Err(FortunaError::NoInitialEntropy)
    }
}

/// Toy 16-byte-block cipher standing in for AES: each block is the
/// plaintext XORed with both key halves. Only good for proving that the
/// factory seam is honored.
struct XorCipher {
    key: [u8; 32],
}

impl BlockCipher for XorCipher {
    fn block_size(&self) -> usize {
        16
    }

    fn encrypt_block(&self, dst: &mut [u8], src: &[u8]) {
        for (i, out) in dst.iter_mut().enumerate() {
            *out = src[i] ^ self.key[i] ^ self.key[16 + i];
        }
    }
}

fn new_xor_cipher(key: &[u8]) -> std::result::Result<Box<dyn BlockCipher>, InvalidLength> {
    let key = key.try_into().map_err(|_| InvalidLength)?;
    Ok(Box::new(XorCipher { key }))
}

/// First output block of a freshly seeded XOR-cipher generator, computed
/// by hand: the key after seeding is the double SHA-256 of the zero key
/// and the seed, and the counter is 1, least-significant byte first.
fn xor_cipher_first_block(seed: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(32 + seed.len());
    input.extend_from_slice(&[0u8; 32]);
    input.extend_from_slice(seed);
    let key: [u8; 32] = Sha256::digest(Sha256::digest(&input)).into();

    let mut counter = [0u8; 16];
    counter[0] = 1;
    (0..16).map(|i| counter[i] ^ key[i] ^ key[16 + i]).collect()
}

#[test]
fn test_open_without_store() {
    let mut rng = Rng::open(None).unwrap();

    let data = rng.random_data(100);
    assert_eq!(data.len(), 100);
    assert_ne!(data, rng.random_data(100));

    assert!(rng.int63() >= 0);
    rng.uint64();

    let mut buf = [0u8; 33];
    rng.fill(&mut buf);

    rng.close().unwrap();
}

#[test]
fn test_open_creates_seed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = seed_path(&dir);

    let mut rng = Rng::open(Some(SeedStore::open(&path).unwrap())).unwrap();
    rng.random_data(1);

    let on_disk = fs::read(&path).unwrap();
    assert_eq!(on_disk.len(), SEED_FILE_SIZE);
    assert!(on_disk.iter().any(|&b| b != 0));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    rng.close().unwrap();
}

#[test]
fn test_stored_seed_is_replaced_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = seed_path(&dir);

    fs::write(&path, [0x17u8; SEED_FILE_SIZE]).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
    }

    let mut rng = Rng::open(Some(SeedStore::open(&path).unwrap())).unwrap();

    // The old seed must never survive on disk once it has been folded
    // into the generator.
    let on_disk = fs::read(&path).unwrap();
    assert_eq!(on_disk.len(), SEED_FILE_SIZE);
    assert_ne!(on_disk, vec![0x17u8; SEED_FILE_SIZE]);

    rng.close().unwrap();
}

#[test]
fn test_close_writes_final_seed_and_releases_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = seed_path(&dir);

    let mut rng = Rng::open(Some(SeedStore::open(&path).unwrap())).unwrap();
    let after_open = fs::read(&path).unwrap();
    rng.close().unwrap();
    let after_close = fs::read(&path).unwrap();
    assert_eq!(after_close.len(), SEED_FILE_SIZE);
    assert_ne!(after_open, after_close);

    // The advisory lock is gone, so a second run can start.
    let mut second = Rng::open(Some(SeedStore::open(&path).unwrap())).unwrap();
    second.close().unwrap();
}

#[cfg(unix)]
#[test]
fn test_concurrent_open_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = seed_path(&dir);

    let mut rng = Rng::open(Some(SeedStore::open(&path).unwrap())).unwrap();
    assert!(matches!(
        SeedStore::open(&path),
        Err(FortunaError::ConcurrentUse)
    ));
    rng.close().unwrap();
}

#[test]
fn test_corrupt_seed_file_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = seed_path(&dir);

    fs::write(&path, [1u8; 5]).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
    }

    let store = SeedStore::open(&path).unwrap();
    assert!(matches!(
        Rng::open(Some(store)),
        Err(FortunaError::CorruptSeedFile)
    ));
}

#[test]
fn test_no_initial_entropy_fails_open() {
    assert!(matches!(
        Rng::open_with(new_aes256, &NoEntropy, None),
        Err(FortunaError::NoInitialEntropy)
    ));
}

#[test]
fn test_open_with_fixed_provider() {
    let mut rng = Rng::open_with(new_aes256, &FixedSeed, None).unwrap();
    assert_eq!(rng.random_data(64).len(), 64);
    rng.close().unwrap();
}

#[test]
fn test_generator_uses_substitute_cipher() {
    let mut generator = Generator::new(new_xor_cipher);
    generator.seed_from_int(1);
    let out = generator.pseudo_random_data(16);
    assert_eq!(out, xor_cipher_first_block(&1i64.to_be_bytes()));

    // The same seed under the default AES binding must look different.
    let mut aes = Generator::new(new_aes256);
    aes.seed_from_int(1);
    assert_ne!(aes.pseudo_random_data(16), out);
}

#[test]
fn test_open_with_substitute_cipher() {
    // With a fixed initial seed, no seed store, and no pool entropy, the
    // first façade read is fully determined by the chosen cipher.
    let mut rng = Rng::open_with(new_xor_cipher, &FixedSeed, None).unwrap();
    let out = rng.random_data(16);
    assert_eq!(out, xor_cipher_first_block(&[0x42u8; 64]));
    rng.close().unwrap();
}

#[test]
#[should_panic(expected = "used after close")]
fn test_use_after_close_panics() {
    let mut rng = Rng::open(None).unwrap();
    rng.random_data(1);
    rng.close().unwrap();
    rng.random_data(1);
}

#[test]
fn test_entropy_sinks_feed_the_pools() {
    let mut rng = Rng::open(None).unwrap();

    let data_sink = rng.new_entropy_data_sink();
    let timestamp_sink = rng.new_entropy_timestamp_sink();

    // Short payloads pass through; long ones are hashed by the consumer.
    data_sink.send(vec![1, 2, 3]).unwrap();
    data_sink.send(vec![0xEEu8; 100]).unwrap();
    for _ in 0..8 {
        timestamp_sink.send(Instant::now()).unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }

    drop(data_sink);
    drop(timestamp_sink);

    assert_eq!(rng.random_data(32).len(), 32);
    rng.close().unwrap();
}

#[test]
fn test_reseeding_during_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = seed_path(&dir);

    let mut rng = Rng::open(Some(SeedStore::open(&path).unwrap())).unwrap();
    let sink = rng.new_entropy_data_sink();

    // Enough pool-0 traffic to leave a reseed pending while the final
    // seed write runs.
    for _ in 0..32 {
        sink.send(vec![0u8; 32]).unwrap();
    }
    drop(sink);

    rng.close().unwrap();
}

#[test]
fn test_drop_performs_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = seed_path(&dir);

    {
        let rng = Rng::open(Some(SeedStore::open(&path).unwrap())).unwrap();
        let sink = rng.new_entropy_data_sink();
        sink.send(vec![9u8; 16]).unwrap();
    }

    // Drop released the lock and left a valid seed file behind.
    assert_eq!(fs::read(&path).unwrap().len(), SEED_FILE_SIZE);
    let mut rng = Rng::open(Some(SeedStore::open(&path).unwrap())).unwrap();
    rng.close().unwrap();
}

#[test]
fn test_rng_is_a_rand_source() {
    fn draw<R: rand_core::RngCore + rand_core::CryptoRng>(rng: &mut R) -> (u64, [u8; 16]) {
        let mut buf = [0u8; 16];
        rng.fill_bytes(&mut buf);
        (rng.next_u64(), buf)
    }

    let mut rng = Rng::open(None).unwrap();
    let (value, buf) = draw(&mut rng);
    let (again, _) = draw(&mut rng);
    assert_ne!(value, again);
    assert!(buf.iter().any(|&b| b != 0));
    rng.close().unwrap();
}
