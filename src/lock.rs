//! Whole-file advisory lock guarding the ring metadata.
//!
//! Every metadata read and every data copy happens while holding this
//! lock; it is released before any blocking FIFO wait so the peer is
//! never starved. Because it is a POSIX record lock, closing the
//! descriptor (including by process death) releases it, so a crashed
//! peer never leaves the ring stuck. Relocking an already-held file is a
//! no-op and unlocking an unheld one is legal, which keeps the error
//! paths simple.

use std::os::fd::RawFd;

use crate::error::{Error, Result};

/// RAII guard over the file lock. Dropping it unlocks.
pub struct FileLock {
    fd: RawFd,
}

impl FileLock {
    /// Block until the whole-file write lock is acquired.
    ///
    /// The wait is quasi-bounded: peers only hold the lock across short
    /// lock/manipulate/release sequences. A signal during the wait
    /// surfaces as `Interrupted`; the library never alters the host's
    /// signal handling.
    pub fn acquire(fd: RawFd) -> Result<Self> {
        let fl = libc::flock {
            l_type: libc::F_WRLCK as libc::c_short,
            l_whence: libc::SEEK_SET as libc::c_short,
            l_start: 0,
            l_len: 0,
            l_pid: 0,
        };
        if unsafe { libc::fcntl(fd, libc::F_SETLKW, &fl) } < 0 {
            let e = std::io::Error::last_os_error();
            return if e.raw_os_error() == Some(libc::EINTR) {
                Err(Error::Interrupted)
            } else {
                Err(Error::io("fcntl(F_SETLKW)", "", e))
            };
        }
        Ok(Self { fd })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let fl = libc::flock {
            l_type: libc::F_UNLCK as libc::c_short,
            l_whence: libc::SEEK_SET as libc::c_short,
            l_start: 0,
            l_len: 0,
            l_pid: 0,
        };
        if unsafe { libc::fcntl(self.fd, libc::F_SETLK, &fl) } < 0 {
            tracing::warn!(
                fd = self.fd,
                error = %std::io::Error::last_os_error(),
                "ring lock release failed"
            );
        }
    }
}
