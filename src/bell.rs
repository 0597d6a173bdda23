//! The bell: a pair of named FIFOs used purely as wakeup signals.
//!
//! A ring file has two FIFOs created beside it, derived from its path so
//! any process holding the ring path can re-derive them: `<dir>/.<base>.w2r`
//! (writer wakes reader) and `<dir>/.<base>.r2w` (reader wakes writer).
//! Ringing writes one byte; the data itself is in the ring. A wakeup is
//! only a hint. The woken peer re-checks actual ring state, so missed or
//! redundant bytes are harmless, and a full FIFO already satisfies the
//! only requirement (being readable while data is pending).

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const FIFO_MODE: libc::mode_t = 0o644;

/// Derive the FIFO pair paths from the ring file path.
/// Returns (w2r, r2w).
pub fn fifo_paths(ring: &Path) -> Result<(PathBuf, PathBuf)> {
    let dir = ring.parent().filter(|d| !d.as_os_str().is_empty());
    let base = ring
        .file_name()
        .ok_or(Error::IncompatibleFlags("ring path has no file name"))?
        .to_string_lossy()
        .into_owned();

    let mut w2r = dir.map(Path::to_path_buf).unwrap_or_default();
    let mut r2w = w2r.clone();
    w2r.push(format!(".{base}.w2r"));
    r2w.push(format!(".{base}.r2w"));
    Ok((w2r, r2w))
}

/// Create both FIFOs, removing stale ones first. Called once, by `init`.
pub fn create_pair(w2r: &Path, r2w: &Path) -> Result<()> {
    for path in [w2r, r2w] {
        crate::map::unlink_quiet(path)?;
        let cpath = cstring(path)?;
        if unsafe { libc::mkfifo(cpath.as_ptr(), FIFO_MODE) } != 0 {
            return Err(Error::io(
                "mkfifo",
                path,
                std::io::Error::last_os_error(),
            ));
        }
    }
    Ok(())
}

/// Open a FIFO read-write. `O_RDWR` on a FIFO is Linux-specific (see
/// fifo(7)) and is what lets either peer attach whether or not the other
/// exists: the bell notifies the peer if present and is a no-op otherwise.
pub fn open_rw(path: &Path) -> Result<OwnedFd> {
    let cpath = cstring(path)?;
    let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        return Err(Error::io("open", path, std::io::Error::last_os_error()));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    let fl = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if fl < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Ring the bell: write one byte, non-blocking. A saturated FIFO counts
/// as success: it is already readable, which is all the bell promises.
pub fn ring(fd: &OwnedFd) -> std::io::Result<()> {
    let b = 0u8;
    let nr = unsafe { libc::write(fd.as_raw_fd(), &b as *const u8 as *const libc::c_void, 1) };
    if nr < 0 {
        let e = std::io::Error::last_os_error();
        if e.kind() != std::io::ErrorKind::WouldBlock {
            return Err(e);
        }
    }
    Ok(())
}

/// Block reading the FIFO until the peer rings. Readability means "go
/// re-check the ring", nothing more. A big read soaks up any backlog of
/// wakeup bytes in one call.
pub fn wait(fd: &OwnedFd, ring: &Path) -> Result<()> {
    let mut buf = [0u8; 4096];
    let nr = unsafe {
        libc::read(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if nr < 0 {
        let e = std::io::Error::last_os_error();
        return if e.raw_os_error() == Some(libc::EINTR) {
            Err(Error::Interrupted)
        } else {
            Err(Error::io("read", ring, e))
        };
    }
    Ok(())
}

/// Drain at most one pending byte (select-fd mode). The fd is
/// non-blocking in that mode, so an empty FIFO is fine. Draining a
/// single byte, never more, keeps level-triggered readiness meaning
/// "check the ring again" rather than counting events.
pub fn drain_one(fd: &OwnedFd) -> std::io::Result<()> {
    let mut b = 0u8;
    let nr = unsafe { libc::read(fd.as_raw_fd(), &mut b as *mut u8 as *mut libc::c_void, 1) };
    if nr < 0 {
        let e = std::io::Error::last_os_error();
        if e.kind() != std::io::ErrorKind::WouldBlock {
            return Err(e);
        }
    }
    Ok(())
}

fn cstring(path: &Path) -> Result<std::ffi::CString> {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::IncompatibleFlags("path contains a NUL byte"))
}
