//! Seed-file persistence and advisory locking

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::error::{FortunaError, Result};

/// Seed file size in bytes: raw seed data, no header.
pub const SEED_FILE_SIZE: usize = 64;

/// An exclusively locked seed file: 64 raw bytes of generator output
/// carried across process restarts, so the next run starts from an
/// unpredictable state before fresh entropy has accumulated.
///
/// The contents are confidential and the file must be readable by its
/// owner only. The advisory lock is held for the lifetime of the store,
/// so two generator instances can never share one seed file; platforms
/// without advisory locking get stub no-ops and lose that protection.
pub struct SeedStore {
    file: File,
    path: PathBuf,
}

impl SeedStore {
    /// Open the seed file at `path`, creating it empty if absent, and
    /// take an exclusive non-blocking advisory lock on it. Fails with
    /// [`FortunaError::ConcurrentUse`] if another process holds the
    /// lock.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = std::fs::OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&path)?;

        if !flock::lock_exclusive(&file)? {
            tracing::warn!(path = %path.display(), "seed file is locked by another process");
            return Err(FortunaError::ConcurrentUse);
        }
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted seed. `Ok(None)` means the file is empty
    /// (just created) and the store needs initialisation. A file with
    /// lax permissions, a wrong size, or all-zero contents is rejected.
    pub(crate) fn read_seed(&mut self) -> Result<Option<Zeroizing<[u8; SEED_FILE_SIZE]>>> {
        let metadata = self.file.metadata()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o077 != 0 {
                return Err(FortunaError::InsecureSeedFile);
            }
        }
        if metadata.len() == 0 {
            return Ok(None);
        }
        if metadata.len() != SEED_FILE_SIZE as u64 {
            return Err(FortunaError::CorruptSeedFile);
        }

        let mut seed = Zeroizing::new([0u8; SEED_FILE_SIZE]);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut *seed)?;
        if seed.iter().all(|&b| b == 0) {
            return Err(FortunaError::CorruptSeedFile);
        }
        Ok(Some(seed))
    }

    /// Replace the stored seed and flush it to disk before returning.
    pub(crate) fn write_seed(&mut self, seed: &[u8; SEED_FILE_SIZE]) -> Result<()> {
        // The mode passed at open time only applies when the file is
        // created; a pre-existing file is re-tightened on every write.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            self.file
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(seed)?;
        self.file.set_len(SEED_FILE_SIZE as u64)?;
        self.file.sync_all()?;
        tracing::debug!(path = %self.path.display(), "seed file updated");
        Ok(())
    }
}

impl Drop for SeedStore {
    fn drop(&mut self) {
        flock::unlock(&self.file);
    }
}

#[cfg(unix)]
mod flock {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    /// Try to take an exclusive advisory lock without blocking. Returns
    /// `Ok(false)` when the file is locked elsewhere.
    pub(super) fn lock_exclusive(file: &File) -> io::Result<bool> {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Ok(false)
        } else {
            Err(err)
        }
    }

    pub(super) fn unlock(file: &File) {
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(not(unix))]
mod flock {
    use std::fs::File;
    use std::io;

    // No advisory locking on this platform: concurrent instances sharing
    // a seed file are not detected.
    pub(super) fn lock_exclusive(_file: &File) -> io::Result<bool> {
        Ok(true)
    }

    pub(super) fn unlock(_file: &File) {}
}
