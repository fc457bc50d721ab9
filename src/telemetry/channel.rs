//! Writer side of a telemetry channel.
//!
//! A channel is a 200-byte shared-memory segment at `<shm_dir>/<name>` plus
//! the named semaphore `/sem_<name>`. Both are world read/write so readers
//! need no privileges. They exist only while the daemon runs: creating a
//! channel discards whatever a previous instance left behind, and closing it
//! unlinks both.

use crate::core::SensorClass;
use crate::error::{AppResult, DaemonError};
use crate::telemetry::record::{self, RECORD_SIZE};
use crate::telemetry::semaphore::{self, NamedSemaphore};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{self, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace, warn};

const WORLD_RW: u32 = 0o666;

/// Where channels are created and how long a publish may wait for the lock.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub shm_dir: PathBuf,
    pub lock_timeout: Duration,
}

impl ChannelOptions {
    pub fn new(shm_dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            shm_dir: shm_dir.into(),
            lock_timeout,
        }
    }

    /// Create the channel `name` for a sensor of `class`.
    pub fn create(&self, name: &str, class: SensorClass) -> AppResult<TelemetryChannel> {
        TelemetryChannel::create(self, name, class)
    }
}

/// A live channel owned by one sensor session.
pub struct TelemetryChannel {
    name: String,
    class: SensorClass,
    path: PathBuf,
    map: MmapMut,
    semaphore: NamedSemaphore,
    lock_timeout: Duration,
    unlinked: bool,
}

impl std::fmt::Debug for TelemetryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryChannel")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("path", &self.path)
            .finish()
    }
}

impl TelemetryChannel {
    /// Create (or re-create) the segment and semaphore for `name`.
    ///
    /// # Arguments
    /// * `options` - shm directory and lock timeout
    /// * `name` - channel name, already validated
    /// * `class` - written into every record header
    ///
    /// # Returns
    /// A channel with a zero-filled record, or `ChannelCreation`.
    pub fn create(options: &ChannelOptions, name: &str, class: SensorClass) -> AppResult<Self> {
        let failed = |reason: String| DaemonError::ChannelCreation {
            channel: name.to_string(),
            reason,
        };

        let path = options.shm_dir.join(name);
        remove_stale(&path).map_err(|e| failed(format!("{}: {}", path.display(), e)))?;

        let map = map_segment(&path).map_err(|e| failed(format!("{}: {}", path.display(), e)))?;

        let semaphore = match NamedSemaphore::create(&semaphore::semaphore_name(name)) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                drop(map);
                if let Err(cleanup) = remove_stale(&path) {
                    warn!(channel = name, path = %path.display(), error = %cleanup, "Could not remove segment after semaphore failure");
                }
                return Err(failed(format!("semaphore: {}", e)));
            }
        };

        debug!(channel = name, class = %class, path = %path.display(), "Created telemetry channel");
        Ok(Self {
            name: name.to_string(),
            class,
            path,
            map,
            semaphore,
            lock_timeout: options.lock_timeout,
            unlinked: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> SensorClass {
        self.class
    }

    /// Path of the shared-memory segment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the mapped segment in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Never true for a created channel.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Publish one distance and status under the channel lock.
    pub fn publish_single(&mut self, distance_mm: u16, status: u8) -> AppResult<()> {
        let timestamp = now();
        let class = self.class;
        let map = &mut self.map;
        let _guard = lock(&self.semaphore, &self.name, self.lock_timeout)?;
        record::encode_single(&mut map[..], timestamp, class, distance_mm, status);
        trace!(channel = %self.name, distance_mm, status, "Published single reading");
        Ok(())
    }

    /// Publish the first `resolution` zones under the channel lock.
    ///
    /// `resolution` must be 16 or 64 and both slices must hold at least that
    /// many entries; otherwise nothing is written.
    pub fn publish_matrix(&mut self, distances: &[u16], statuses: &[u8], resolution: u8) -> AppResult<()> {
        let zones = usize::from(resolution);
        if !matches!(resolution, 16 | 64) || distances.len() < zones || statuses.len() < zones {
            return Err(DaemonError::InvalidResolution {
                channel: self.name.clone(),
                resolution,
            });
        }

        let timestamp = now();
        let class = self.class;
        let map = &mut self.map;
        let _guard = lock(&self.semaphore, &self.name, self.lock_timeout)?;
        record::encode_matrix(&mut map[..], timestamp, class, resolution, distances, statuses);
        trace!(channel = %self.name, resolution, "Published matrix reading");
        Ok(())
    }

    /// Unlink the segment and semaphore, then unmap.
    pub fn close(mut self) -> AppResult<()> {
        self.unlink()
    }

    fn unlink(&mut self) -> AppResult<()> {
        if self.unlinked {
            return Ok(());
        }
        self.unlinked = true;
        let file = remove_stale(&self.path);
        let sem = self.semaphore.unlink();
        debug!(channel = %self.name, "Closed telemetry channel");
        file?;
        sem.or_else(ignore_not_found)?;
        Ok(())
    }
}

impl Drop for TelemetryChannel {
    fn drop(&mut self) {
        if let Err(e) = self.unlink() {
            warn!(channel = %self.name, error = %e, "Failed to unlink telemetry channel");
        }
    }
}

fn lock<'a>(
    semaphore: &'a NamedSemaphore,
    channel: &str,
    timeout: Duration,
) -> AppResult<semaphore::SemaphoreGuard<'a>> {
    semaphore.acquire(timeout).map_err(|e| match e.kind() {
        io::ErrorKind::TimedOut => DaemonError::LockTimeout {
            channel: channel.to_string(),
            waited_ms: timeout.as_millis() as u64,
        },
        _ => DaemonError::Io(e),
    })
}

fn now() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX)
}

fn ignore_not_found(e: io::Error) -> io::Result<()> {
    if e.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(e)
    }
}

fn remove_stale(path: &Path) -> io::Result<()> {
    fs::remove_file(path).or_else(ignore_not_found)
}

fn map_segment(path: &Path) -> io::Result<MmapMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .mode(WORLD_RW)
        .open(path)?;
    // The create mode is filtered through the umask.
    file.set_permissions(Permissions::from_mode(WORLD_RW))?;
    file.set_len(RECORD_SIZE as u64)?;

    // SAFETY: the file was just created at the right size and is only
    // written through this mapping; external readers follow the semaphore.
    #[allow(unsafe_code)]
    let mut map = unsafe { MmapOptions::new().len(RECORD_SIZE).map_mut(&file)? };
    map.fill(0);
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::record::{decode, Payload};
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> ChannelOptions {
        ChannelOptions::new(dir.path(), Duration::from_millis(200))
    }

    fn unique(prefix: &str) -> String {
        format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
    }

    fn snapshot(channel: &TelemetryChannel) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf.copy_from_slice(&fs::read(channel.path()).unwrap());
        buf
    }

    #[test]
    fn test_create_sizes_and_opens_segment() {
        let dir = TempDir::new().unwrap();
        let channel = options(&dir)
            .create(&unique("front"), SensorClass::SingleZoneRanger)
            .unwrap();

        let meta = fs::metadata(channel.path()).unwrap();
        assert_eq!(meta.len(), RECORD_SIZE as u64);
        assert_eq!(meta.permissions().mode() & 0o777, 0o666);
        assert_eq!(channel.len(), RECORD_SIZE);
        assert!(snapshot(&channel).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_semaphore_is_world_accessible_outside_default_dir() {
        let dir = TempDir::new().unwrap();
        let name = unique("perm");
        let _channel = options(&dir).create(&name, SensorClass::SingleZoneRanger).unwrap();

        let meta = fs::metadata(semaphore::semaphore_path(&name)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o666);
        assert!(!dir.path().join(semaphore::semaphore_file_name(&name)).exists());
    }

    #[test]
    fn test_longest_valid_name_gets_a_channel() {
        let dir = TempDir::new().unwrap();
        let prefix = unique("long");
        let name = format!(
            "{}{}",
            prefix,
            "x".repeat(semaphore::MAX_CHANNEL_NAME_LEN - prefix.len())
        );
        assert!(crate::validation::is_valid_channel_name(&name).is_ok());

        let channel = options(&dir).create(&name, SensorClass::SingleZoneRanger).unwrap();
        assert!(semaphore::semaphore_path(&name).exists());
        channel.close().unwrap();
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_semaphore_failure_removes_segment() {
        let dir = TempDir::new().unwrap();
        // Fits as a segment file name but not as `sem.sem_<name>`.
        let name = "y".repeat(250);

        let result = options(&dir).create(&name, SensorClass::SingleZoneRanger);
        assert!(matches!(result, Err(DaemonError::ChannelCreation { .. })));
        assert!(!dir.path().join(&name).exists());
        assert!(!logs_contain("Could not remove segment"));
    }

    #[test]
    fn test_create_discards_stale_segment() {
        let dir = TempDir::new().unwrap();
        let name = unique("stale");
        fs::write(dir.path().join(&name), [0xFFu8; 17]).unwrap();

        let channel = options(&dir).create(&name, SensorClass::ColourSensor).unwrap();
        let bytes = snapshot(&channel);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_last_single_write_wins() {
        let dir = TempDir::new().unwrap();
        let mut channel = options(&dir)
            .create(&unique("single"), SensorClass::SingleZoneRanger)
            .unwrap();

        channel.publish_single(1234, 0).unwrap();
        channel.publish_single(0, 5).unwrap();

        let record = decode(&snapshot(&channel)).unwrap();
        assert_eq!(record.resolution, 1);
        assert_eq!(record.payload, Payload::Single { distance_mm: 0, status: 5 });
        assert!(!record.is_empty());
    }

    #[test]
    fn test_matrix_resolution_is_checked() {
        let dir = TempDir::new().unwrap();
        let mut channel = options(&dir)
            .create(&unique("matrix"), SensorClass::MultiZoneRanger)
            .unwrap();

        let result = channel.publish_matrix(&[1; 64], &[0; 64], 32);
        assert!(matches!(
            result,
            Err(DaemonError::InvalidResolution { resolution: 32, .. })
        ));
        let result = channel.publish_matrix(&[1; 8], &[0; 8], 16);
        assert!(result.is_err());
        // Nothing reached the segment.
        assert!(snapshot(&channel).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_close_unlinks_segment_and_semaphore() {
        let dir = TempDir::new().unwrap();
        let name = unique("closed");
        let channel = options(&dir).create(&name, SensorClass::SingleZoneRanger).unwrap();
        let path = channel.path().to_path_buf();

        channel.close().unwrap();
        assert!(!path.exists());
        assert!(NamedSemaphore::open(&semaphore::semaphore_name(&name)).is_err());
    }

    #[test]
    fn test_publish_times_out_while_reader_holds_lock() {
        let dir = TempDir::new().unwrap();
        let name = unique("held");
        let mut channel = ChannelOptions::new(dir.path(), Duration::from_millis(30))
            .create(&name, SensorClass::SingleZoneRanger)
            .unwrap();

        let reader = NamedSemaphore::open(&semaphore::semaphore_name(&name)).unwrap();
        let guard = reader.acquire(Duration::from_millis(10)).unwrap();
        assert!(matches!(
            channel.publish_single(1, 0),
            Err(DaemonError::LockTimeout { waited_ms: 30, .. })
        ));
        drop(guard);
        assert!(channel.publish_single(1, 0).is_ok());
    }
}
