//! Environmental entropy: the initial seed and the sink consumers

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::accumulator::{Accumulator, MAX_EVENT_SIZE};
use crate::error::{FortunaError, Result};
use crate::generator::KEY_SIZE;

/// Capacity of each sink's channel; producers block once it is full.
const SINK_BUFFER: usize = 4;

/// How often a blocked consumer re-checks the shutdown flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Files whose contents are hard for an attacker to predict.
const ENTROPY_FILES: &[&str] = &["/proc/timer_list", "/proc/stat"];

/// Produces the one-off seed used to start a generator. Implementations
/// must yield data an attacker cannot fully know; the buffer is wiped
/// after it has been folded in.
pub trait InitialSeedProvider {
    fn initial_seed(&self) -> Result<Zeroizing<Vec<u8>>>;
}

/// The default provider: OS RNG, kernel entropy files, wall clock,
/// network interfaces, and user identity.
///
/// The result counts as good only if the OS RNG contributed at least
/// [`KEY_SIZE`] bytes or an entropy file contributed at least 1024; the
/// remaining sources merely separate machines and runs from one another.
pub struct SystemEntropy;

impl InitialSeedProvider for SystemEntropy {
    fn initial_seed(&self) -> Result<Zeroizing<Vec<u8>>> {
        let mut data = Zeroizing::new(Vec::with_capacity(4096));
        let mut good = false;

        let mut os_bytes = Zeroizing::new([0u8; KEY_SIZE]);
        match getrandom::getrandom(&mut *os_bytes) {
            Ok(()) => {
                data.extend_from_slice(&*os_bytes);
                good = true;
                tracing::debug!("initial seed: OS random number generator");
            }
            Err(err) => tracing::warn!(%err, "OS random number generator unavailable"),
        }

        for path in ENTROPY_FILES {
            if let Ok(mut contents) = fs::read(path) {
                good = good || contents.len() >= 1024;
                data.extend_from_slice(&contents);
                contents.zeroize();
                tracing::debug!(path, "initial seed: entropy file");
            }
        }

        if !good {
            return Err(FortunaError::NoInitialEntropy);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as i64)
            .unwrap_or(0);
        data.extend_from_slice(&now.to_be_bytes());

        data.extend_from_slice(&interface_fingerprint());
        data.extend_from_slice(&user_fingerprint());

        Ok(data)
    }
}

#[cfg(target_os = "linux")]
fn interface_fingerprint() -> Vec<u8> {
    let mut data = Vec::new();
    if let Ok(entries) = fs::read_dir("/sys/class/net") {
        for entry in entries.flatten() {
            let name = entry.file_name();
            data.extend_from_slice(name.to_string_lossy().as_bytes());
            for attr in ["mtu", "address", "flags"] {
                if let Ok(value) = fs::read(entry.path().join(attr)) {
                    data.extend_from_slice(&value);
                }
            }
        }
    }
    data
}

#[cfg(not(target_os = "linux"))]
fn interface_fingerprint() -> Vec<u8> {
    Vec::new()
}

fn user_fingerprint() -> Vec<u8> {
    let mut data = Vec::new();
    #[cfg(unix)]
    {
        let uid = unsafe { libc::getuid() } as u64;
        let gid = unsafe { libc::getgid() } as u64;
        data.extend_from_slice(&uid.to_be_bytes());
        data.extend_from_slice(&gid.to_be_bytes());
    }
    for var in ["USER", "LOGNAME", "HOME"] {
        if let Ok(value) = std::env::var(var) {
            data.extend_from_slice(value.as_bytes());
        }
    }
    data
}

/// Start a consumer feeding byte payloads into the accumulator.
/// Payloads over [`MAX_EVENT_SIZE`] are replaced by their SHA-256 digest
/// before submission. The consumer exits once every sender is dropped,
/// or when `stop` is raised.
pub(crate) fn spawn_data_sink(
    accumulator: Arc<Accumulator>,
    stop: Arc<AtomicBool>,
) -> (SyncSender<Vec<u8>>, JoinHandle<()>) {
    let source = accumulator.allocate_source();
    let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(SINK_BUFFER);
    let handle = thread::Builder::new()
        .name(format!("fortuna-data-sink-{source}"))
        .spawn(move || {
            let mut seq: u64 = 0;
            loop {
                match receiver.recv_timeout(STOP_POLL_INTERVAL) {
                    Ok(mut data) => {
                        if data.len() > MAX_EVENT_SIZE {
                            let digest = Sha256::digest(&data);
                            data.zeroize();
                            data = digest.to_vec();
                        }
                        let _ = accumulator.add_random_event(source, seq, &data);
                        data.zeroize();
                        seq += 1;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .expect("failed to spawn entropy sink thread");
    (sender, handle)
}

/// Start a consumer turning timestamps into entropy events. Each
/// received instant is encoded as the signed big-endian nanosecond delta
/// from the previously received one; the register starts at sink
/// creation time.
pub(crate) fn spawn_timestamp_sink(
    accumulator: Arc<Accumulator>,
    stop: Arc<AtomicBool>,
) -> (SyncSender<Instant>, JoinHandle<()>) {
    let source = accumulator.allocate_source();
    let (sender, receiver) = mpsc::sync_channel::<Instant>(SINK_BUFFER);
    let handle = thread::Builder::new()
        .name(format!("fortuna-timestamp-sink-{source}"))
        .spawn(move || {
            let mut seq: u64 = 0;
            let mut last = Instant::now();
            loop {
                match receiver.recv_timeout(STOP_POLL_INTERVAL) {
                    Ok(now) => {
                        let delta = signed_nanos_between(last, now);
                        last = now;
                        let _ = accumulator.add_random_event(source, seq, &delta.to_be_bytes());
                        seq += 1;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .expect("failed to spawn entropy sink thread");
    (sender, handle)
}

/// Nanoseconds from `last` to `now`, negative when `now` is earlier.
fn signed_nanos_between(last: Instant, now: Instant) -> i64 {
    match now.checked_duration_since(last) {
        Some(elapsed) => elapsed.as_nanos() as i64,
        None => -(last.duration_since(now).as_nanos() as i64),
    }
}
