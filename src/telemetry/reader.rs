//! Reader side of a telemetry channel.
//!
//! Attaches read-only to a channel created by a running daemon and takes a
//! lock-guarded snapshot of its record.

use crate::error::{AppResult, DaemonError};
use crate::telemetry::record::{self, TelemetryRecord, RECORD_SIZE};
use crate::telemetry::semaphore::{self, NamedSemaphore};
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default wait for the channel lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Read-only attachment to a channel.
pub struct TelemetryReader {
    name: String,
    path: PathBuf,
    map: Mmap,
    semaphore: NamedSemaphore,
    lock_timeout: Duration,
}

impl TelemetryReader {
    /// Attach to the channel `name` under `shm_dir`.
    pub fn open(shm_dir: impl AsRef<Path>, name: &str) -> AppResult<Self> {
        let path = shm_dir.as_ref().join(name);
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len < RECORD_SIZE as u64 {
            return Err(DaemonError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is {} bytes, expected {}", path.display(), len, RECORD_SIZE),
            )));
        }

        // SAFETY: mapped read-only; the writer only changes the bytes while
        // holding the semaphore, which `read` takes before copying.
        #[allow(unsafe_code)]
        let map = unsafe { Mmap::map(&file)? };
        let semaphore = NamedSemaphore::open(&semaphore::semaphore_name(name))?;

        Ok(Self {
            name: name.to_string(),
            path,
            map,
            semaphore,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the raw record under the lock.
    pub fn snapshot(&self) -> AppResult<[u8; RECORD_SIZE]> {
        let _guard = self.semaphore.acquire(self.lock_timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                DaemonError::LockTimeout {
                    channel: self.name.clone(),
                    waited_ms: self.lock_timeout.as_millis() as u64,
                }
            } else {
                DaemonError::Io(e)
            }
        })?;
        let mut buf = [0u8; RECORD_SIZE];
        buf.copy_from_slice(&self.map[..RECORD_SIZE]);
        Ok(buf)
    }

    /// Take a snapshot and decode it.
    pub fn read(&self) -> AppResult<TelemetryRecord> {
        let buf = self.snapshot()?;
        record::decode(&buf).map_err(|source| DaemonError::CorruptRecord {
            channel: self.name.clone(),
            source,
        })
    }
}
