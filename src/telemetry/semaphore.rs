//! Named POSIX semaphore used as the per-channel lock.
//!
//! The semaphore is created with value 1 and used as a mutex by the daemon
//! and by every external reader. On Linux it lives in `/dev/shm` as
//! `sem.<name-without-slash>`.

use std::ffi::CString;
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Where glibc keeps named semaphores, whatever the channel directory is.
pub const SEMAPHORE_DIR: &str = "/dev/shm";

/// Prefix glibc puts in front of a semaphore name (without its leading `/`)
/// to form the backing file name.
const BACKING_FILE_PREFIX: &str = "sem.";

/// Prefix of every channel semaphore name.
const NAME_PREFIX: &str = "/sem_";

/// Longest file name the kernel accepts in one path component.
const NAME_MAX: usize = 255;

/// Longest channel name whose semaphore backing file still fits `NAME_MAX`.
pub const MAX_CHANNEL_NAME_LEN: usize =
    NAME_MAX - (BACKING_FILE_PREFIX.len() + NAME_PREFIX.len() - 1);

/// Semaphore name for a channel.
pub fn semaphore_name(channel: &str) -> String {
    format!("{}{}", NAME_PREFIX, channel)
}

/// File name of the semaphore's backing object inside [`SEMAPHORE_DIR`].
pub fn semaphore_file_name(channel: &str) -> String {
    format!("{}{}", BACKING_FILE_PREFIX, &semaphore_name(channel)[1..])
}

/// Full path of the semaphore's backing object.
pub fn semaphore_path(channel: &str) -> PathBuf {
    Path::new(SEMAPHORE_DIR).join(semaphore_file_name(channel))
}

/// An open named semaphore.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: CString,
    owner: bool,
}

// SAFETY: POSIX semaphores are designed for concurrent use from any thread,
// and the handle is only closed in `Drop`.
#[allow(unsafe_code)]
unsafe impl Send for NamedSemaphore {}
// SAFETY: see above; `sem_timedwait` and `sem_post` are thread-safe.
#[allow(unsafe_code)]
unsafe impl Sync for NamedSemaphore {}

impl std::fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}

#[allow(unsafe_code)]
impl NamedSemaphore {
    /// Create a fresh semaphore with value 1, replacing any stale one.
    ///
    /// The returned handle owns the name and unlinks it when dropped.
    pub fn create(name: &str) -> io::Result<Self> {
        let name = to_cstring(name)?;
        // A leftover from a crashed instance may hold value 0 forever.
        // SAFETY: `name` is a valid NUL-terminated string.
        unsafe { libc::sem_unlink(name.as_ptr()) };

        // SAFETY: valid name; the variadic mode and value are passed as
        // `c_uint` as `sem_open(3)` expects after default promotion.
        let sem = unsafe {
            libc::sem_open(
                name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                1 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        let semaphore = Self {
            sem,
            name,
            owner: true,
        };
        semaphore.open_to_everyone();
        Ok(semaphore)
    }

    /// `sem_open` applies the umask; readers running as other users need 0666.
    fn open_to_everyone(&self) {
        let Some(file_name) = self.name.to_str().ok().and_then(|n| n.strip_prefix('/')) else {
            return;
        };
        let path = Path::new(SEMAPHORE_DIR).join(format!("{}{}", BACKING_FILE_PREFIX, file_name));
        if let Err(e) = fs::set_permissions(&path, Permissions::from_mode(0o666)) {
            warn!(path = %path.display(), error = %e, "Could not relax semaphore permissions");
        }
    }

    /// Open an existing semaphore without taking ownership of the name.
    pub fn open(name: &str) -> io::Result<Self> {
        let name = to_cstring(name)?;
        // SAFETY: valid name, no creation flags.
        let sem = unsafe { libc::sem_open(name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name,
            owner: false,
        })
    }

    /// Take the lock, waiting at most `timeout`.
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] when the deadline passes.
    pub fn acquire(&self, timeout: Duration) -> io::Result<SemaphoreGuard<'_>> {
        let deadline = deadline_after(timeout)?;
        loop {
            // SAFETY: `self.sem` stays open for the lifetime of `self`.
            let rc = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if rc == 0 {
                return Ok(SemaphoreGuard { semaphore: self });
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("semaphore {:?} still held", self.name),
                    ))
                }
                _ => return Err(err),
            }
        }
    }

    /// Remove the name so new openers get a different semaphore.
    pub fn unlink(&self) -> io::Result<()> {
        // SAFETY: valid name.
        if unsafe { libc::sem_unlink(self.name.as_ptr()) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn post(&self) {
        // SAFETY: `self.sem` is open. Posting a held semaphore cannot fail
        // short of overflow, which a value-1 mutex never reaches.
        unsafe { libc::sem_post(self.sem) };
    }
}

impl Drop for NamedSemaphore {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful `sem_open` and is closed once.
        unsafe { libc::sem_close(self.sem) };
        if self.owner {
            let _ = self.unlink();
        }
    }
}

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct SemaphoreGuard<'a> {
    semaphore: &'a NamedSemaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.post();
    }
}

fn to_cstring(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

#[allow(unsafe_code)]
fn deadline_after(timeout: Duration) -> io::Result<libc::timespec> {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid out-pointer.
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let nanos = now.tv_nsec as i64 + i64::from(timeout.subsec_nanos());
    let secs = now.tv_sec as i64 + timeout.as_secs() as i64 + nanos / NANOS_PER_SEC;
    Ok(libc::timespec {
        tv_sec: secs as libc::time_t,
        tv_nsec: (nanos % NANOS_PER_SEC) as libc::c_long,
    })
}
