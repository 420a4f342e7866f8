use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Whether a PID refers to a live process. EPERM still means alive, just
/// not ours to signal.
pub fn pid_alive(pid: u32) -> bool {
    // PID 0 would signal our own process group; anything past pid_t is
    // not a valid PID at all.
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Result of a lock acquisition attempt.
#[derive(Debug)]
pub enum LockOutcome {
    Acquired(LockFile),
    /// Another live process holds the lock; starting again is a no-op.
    HeldByLive(u32),
}

/// Advisory per-agent lock file holding the owner's PID. A stale lock is
/// reclaimed iff its recorded PID is not live.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn acquire(path: &Path, pid: u32) -> std::io::Result<LockOutcome> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                if let Ok(old_pid) = contents.trim().parse::<u32>() {
                    if pid_alive(old_pid) {
                        return Ok(LockOutcome::HeldByLive(old_pid));
                    }
                    warn!(
                        "LockFile: reclaiming stale lock {} (pid {} is dead)",
                        path.display(),
                        old_pid
                    );
                } else {
                    warn!(
                        "LockFile: reclaiming unreadable lock {}",
                        path.display()
                    );
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, pid.to_string())?;
        info!("LockFile: acquired {} (pid {})", path.display(), pid);
        Ok(LockOutcome::Acquired(Self {
            path: path.to_path_buf(),
        }))
    }

    pub fn release(self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("LockFile: release of {} failed: {e}", self.path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_path() -> PathBuf {
        std::env::temp_dir().join(format!("neolight-lock-{}.lock", uuid::Uuid::new_v4()))
    }

    fn expect_acquired(outcome: LockOutcome) -> LockFile {
        match outcome {
            LockOutcome::Acquired(lock) => lock,
            LockOutcome::HeldByLive(pid) => panic!("lock unexpectedly held by {pid}"),
        }
    }

    #[test]
    fn acquire_release_cycle() {
        let path = lock_path();
        let lock = expect_acquired(LockFile::acquire(&path, std::process::id()).unwrap());
        assert!(path.exists());
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_by_live_pid_is_noop() {
        let path = lock_path();
        let me = std::process::id();
        let _lock = expect_acquired(LockFile::acquire(&path, me).unwrap());

        let second = LockFile::acquire(&path, me).unwrap();
        assert!(matches!(second, LockOutcome::HeldByLive(pid) if pid == me));
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let path = lock_path();
        // One past PID_MAX_LIMIT; no Linux process can ever have it.
        fs::write(&path, "4194305").unwrap();

        let lock = expect_acquired(LockFile::acquire(&path, std::process::id()).unwrap());
        lock.release();
    }

    #[test]
    fn garbage_lock_contents_are_reclaimed() {
        let path = lock_path();
        fs::write(&path, "not-a-pid").unwrap();
        let lock = expect_acquired(LockFile::acquire(&path, std::process::id()).unwrap());
        lock.release();
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
        assert!(!pid_alive(4_194_305));
        assert!(!pid_alive(0));
    }
}
