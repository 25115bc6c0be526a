//! Fortuna error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FortunaError {
    /// No initial-entropy source yielded enough data to seed the
    /// generator safely.
    #[error("no strong source of initial entropy available")]
    NoInitialEntropy,

    /// The seed file is exclusively locked by another running instance.
    #[error("seed file is locked by another process")]
    ConcurrentUse,

    /// The seed file is readable by other users. The caller may fix the
    /// permissions (or delete the file) and retry.
    #[error("seed file has insecure permissions, expected mode 0600")]
    InsecureSeedFile,

    /// The seed file has the wrong size or all-zero contents. The caller
    /// may delete the file and retry.
    #[error("seed file is corrupted")]
    CorruptSeedFile,

    /// An entropy event exceeded 32 bytes. Hash the payload and submit
    /// the digest instead.
    #[error("entropy event larger than 32 bytes")]
    OversizedEvent,

    #[error("seed file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FortunaError>;
