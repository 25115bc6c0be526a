//! The top-level random number generator

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use zeroize::Zeroizing;

use crate::accumulator::Accumulator;
use crate::cipher::{new_aes256, NewCipher};
use crate::entropy::{spawn_data_sink, spawn_timestamp_sink, InitialSeedProvider, SystemEntropy};
use crate::error::Result;
use crate::seed::{SeedStore, SEED_FILE_SIZE};

/// How often the background task rewrites the seed file. Ferguson and
/// Schneier recommend every ten minutes or so.
pub const SEED_FILE_UPDATE_INTERVAL: Duration = Duration::from_secs(600);

/// An [`Accumulator`] bound to an optional persistent [`SeedStore`] and
/// a set of entropy-input sinks.
///
/// Opening seeds the generator from the host environment, folds in the
/// stored seed when one exists, and starts a background task that
/// rewrites the seed file every ten minutes. Closing stops the
/// background work, writes one final seed, and wipes the generator key.
///
/// ```no_run
/// use fortuna::{Rng, SeedStore};
///
/// let store = SeedStore::open("/var/lib/myapp/seed")?;
/// let mut rng = Rng::open(Some(store))?;
///
/// let key = rng.random_data(32);
///
/// let sink = rng.new_entropy_timestamp_sink();
/// sink.send(std::time::Instant::now()).ok();
///
/// rng.close()?;
/// # Ok::<(), fortuna::FortunaError>(())
/// ```
pub struct Rng {
    accumulator: Arc<Accumulator>,
    store: Option<Arc<Mutex<SeedStore>>>,
    stop_sinks: Arc<AtomicBool>,
    sink_handles: Mutex<Vec<JoinHandle<()>>>,
    stop_writer: Option<Sender<()>>,
    writer_handle: Option<JoinHandle<()>>,
    closed: bool,
}

impl Rng {
    /// Open a generator over AES-256, seeded from the host environment.
    ///
    /// With a [`SeedStore`], the stored seed is folded into the
    /// generator and immediately replaced by fresh output, and a
    /// background task keeps rewriting it every
    /// [`SEED_FILE_UPDATE_INTERVAL`]. Without one, the generator relies
    /// on the initial seed and incoming entropy alone.
    pub fn open(store: Option<SeedStore>) -> Result<Self> {
        Self::open_with(new_aes256, &SystemEntropy, store)
    }

    /// Like [`Rng::open`] with a caller-chosen block cipher factory and
    /// initial-seed provider.
    pub fn open_with(
        new_cipher: NewCipher,
        provider: &dyn InitialSeedProvider,
        store: Option<SeedStore>,
    ) -> Result<Self> {
        let accumulator = Arc::new(Accumulator::with_cipher(new_cipher));

        // The initial seed depends on the current time among other
        // things, which protects against old seed files restored from
        // backups.
        let initial = provider.initial_seed()?;
        accumulator.reseed(&initial);
        drop(initial);

        let mut store_slot = None;
        let mut stop_writer = None;
        let mut writer_handle = None;

        if let Some(mut store) = store {
            // Fold the stored seed in and replace it on disk before any
            // output derived from it can be handed out. The generator
            // lock is held from the read to the synced write.
            accumulator.with_generator_locked(|generator| -> Result<()> {
                match store.read_seed()? {
                    Some(seed) => {
                        generator.reseed(&*seed);
                        tracing::info!(path = %store.path().display(), "seed file loaded");
                    }
                    None => {
                        tracing::info!(path = %store.path().display(), "creating new seed file");
                    }
                }
                let fresh = Zeroizing::new(generator.pseudo_random_data(SEED_FILE_SIZE));
                store.write_seed(fresh.as_slice().try_into().expect("seed draw is 64 bytes"))
            })?;

            let store = Arc::new(Mutex::new(store));
            let (stop_sender, stop_receiver) = mpsc::channel::<()>();
            let task_accumulator = Arc::clone(&accumulator);
            let task_store = Arc::clone(&store);
            let handle = thread::Builder::new()
                .name("fortuna-seed-writer".into())
                .spawn(move || loop {
                    match stop_receiver.recv_timeout(SEED_FILE_UPDATE_INTERVAL) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(err) = update_seed_store(&task_accumulator, &task_store) {
                                tracing::warn!(%err, "periodic seed file update failed");
                            }
                        }
                        _ => break,
                    }
                })
                .expect("failed to spawn seed writer thread");

            store_slot = Some(store);
            stop_writer = Some(stop_sender);
            writer_handle = Some(handle);
        }

        Ok(Self {
            accumulator,
            store: store_slot,
            stop_sinks: Arc::new(AtomicBool::new(false)),
            sink_handles: Mutex::new(Vec::new()),
            stop_writer,
            writer_handle,
            closed: false,
        })
    }

    /// Return `n` random bytes.
    pub fn random_data(&self, n: usize) -> Vec<u8> {
        self.accumulator.random_data(n)
    }

    /// Fill `buf` completely with random bytes. Never partial.
    pub fn fill(&self, buf: &mut [u8]) {
        self.accumulator.fill(buf);
    }

    /// A random integer in `0..=i64::MAX`.
    pub fn int63(&self) -> i64 {
        self.accumulator.int63()
    }

    /// A random `u64`.
    pub fn uint64(&self) -> u64 {
        self.accumulator.uint64()
    }

    /// Allocate a sink for byte-string entropy. Values longer than 32
    /// bytes are hashed by the consumer before entering the pools. Drop
    /// the sender to end the sink.
    pub fn new_entropy_data_sink(&self) -> SyncSender<Vec<u8>> {
        let (sender, handle) =
            spawn_data_sink(Arc::clone(&self.accumulator), Arc::clone(&self.stop_sinks));
        self.sink_handles
            .lock()
            .expect("sink registry poisoned")
            .push(handle);
        sender
    }

    /// Allocate a sink for timing entropy, such as packet arrivals or
    /// key presses. Instants are converted to inter-arrival deltas by
    /// the consumer. Drop the sender to end the sink.
    pub fn new_entropy_timestamp_sink(&self) -> SyncSender<Instant> {
        let (sender, handle) =
            spawn_timestamp_sink(Arc::clone(&self.accumulator), Arc::clone(&self.stop_sinks));
        self.sink_handles
            .lock()
            .expect("sink registry poisoned")
            .push(handle);
        sender
    }

    /// Shut down: stop the periodic seed writer, stop and join all sink
    /// consumers, write one final seed, wipe the generator key, and
    /// release the seed-file lock. Any later extraction panics.
    ///
    /// Called automatically on drop; call it explicitly to observe
    /// seed-file errors.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Dropping the stop channel wakes the writer immediately.
        self.stop_writer.take();
        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.join();
        }

        self.stop_sinks.store(true, Ordering::Release);
        let handles: Vec<_> = self
            .sink_handles
            .lock()
            .expect("sink registry poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.join();
        }

        // The final write happens while the generator still has its key.
        let result = match &self.store {
            Some(store) => update_seed_store(&self.accumulator, store),
            None => Ok(()),
        };

        self.accumulator.close();
        self.store = None;
        result
    }
}

/// One read-modify-write cycle on the seed store: fold the old seed into
/// the generator, then persist 64 fresh bytes, all under the generator
/// lock.
fn update_seed_store(accumulator: &Accumulator, store: &Mutex<SeedStore>) -> Result<()> {
    let mut store = store.lock().expect("seed store lock poisoned");
    accumulator.with_generator_locked(|generator| {
        match store.read_seed() {
            Ok(Some(seed)) => generator.reseed(&*seed),
            Ok(None) => {}
            Err(err) => tracing::warn!(%err, "stored seed unreadable, replacing it"),
        }
        let fresh = Zeroizing::new(generator.pseudo_random_data(SEED_FILE_SIZE));
        store.write_seed(fresh.as_slice().try_into().expect("seed draw is 64 bytes"))
    })
}

impl Drop for Rng {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "final seed file update failed");
        }
    }
}

// `SeedableRng` is deliberately not implemented: seeding this source
// externally would produce deterministic output from a generator whose
// whole purpose is unpredictability.
impl rand_core::RngCore for Rng {
    fn next_u32(&mut self) -> u32 {
        self.uint64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.uint64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.fill(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
        self.fill(dest);
        Ok(())
    }
}

impl rand_core::CryptoRng for Rng {}
