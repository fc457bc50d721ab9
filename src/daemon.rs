//! Background mode and PID file bookkeeping.

use crate::error::{AppResult, DaemonError};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::stat::{umask, Mode};
use nix::unistd::{dup2, fork, setsid, ForkResult, Pid};
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// PID file held for the lifetime of the process. Removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Fail with `AlreadyRunning` if `path` names a live process.
    ///
    /// A missing, unreadable-as-number, or stale file is not an error.
    pub fn check_not_running(path: &Path) -> AppResult<()> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match contents.trim().parse::<i32>() {
            Ok(pid) if pid > 0 && process_alive(pid) => Err(DaemonError::AlreadyRunning(pid)),
            Ok(pid) => {
                warn!(path = %path.display(), pid, "Ignoring stale PID file");
                Ok(())
            }
            Err(_) => {
                warn!(path = %path.display(), "Ignoring unreadable PID file");
                Ok(())
            }
        }
    }

    /// Write the current process id to `path`.
    pub fn create(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        Self::check_not_running(&path)?;
        fs::write(&path, format!("{}\n", std::process::id()))?;
        debug!(path = %path.display(), "Wrote PID file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Could not remove PID file");
        }
    }
}

fn process_alive(pid: i32) -> bool {
    // Signal 0 only checks for existence and permission.
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(errno) => errno == Errno::EPERM,
    }
}

/// Detach from the controlling terminal.
///
/// Double fork with `setsid` in between, clear the umask, change to `/`, and
/// point stdio at `/dev/null`. Only the grandchild returns.
///
/// Must be called before any threads are started.
pub fn daemonize() -> AppResult<()> {
    fork_and_exit_parent()?;
    setsid().map_err(io::Error::from)?;
    fork_and_exit_parent()?;

    umask(Mode::empty());
    std::env::set_current_dir("/")?;

    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        dup2(null.as_raw_fd(), fd).map_err(io::Error::from)?;
    }
    info!(pid = std::process::id(), "Running in background");
    Ok(())
}

#[allow(unsafe_code)]
fn fork_and_exit_parent() -> AppResult<()> {
    // SAFETY: called while the process is single-threaded, so the child
    // inherits a consistent address space.
    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Child => Ok(()),
        ForkResult::Parent { .. } => std::process::exit(0),
    }
}
