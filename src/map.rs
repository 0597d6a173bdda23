//! Memory mapping of the ring file.
//!
//! One mapping covers the whole file: header first, data region after.
//! The mapping is `MAP_SHARED` so both peers see each other's updates, and
//! the descriptor is kept for the file's advisory lock. Unmapping and
//! closing happen on drop, on every exit path.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use crate::error::{Error, Result};
use crate::layout::RingHeader;

pub struct MappedRing {
    ptr: NonNull<u8>,
    len: usize,
    fd: OwnedFd,
}

// The raw pointer aliases process-shared memory; all access goes through
// the file lock.
unsafe impl Send for MappedRing {}

impl MappedRing {
    /// Exclusively create the ring file, size it, and map it.
    /// A concurrent create of the same path loses with `AlreadyExists`.
    pub fn create(path: &Path, file_len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::AlreadyExists(path.to_path_buf())
                } else {
                    Error::io("open", path, e)
                }
            })?;

        if unsafe { libc::ftruncate(file.as_raw_fd(), file_len as libc::off_t) } != 0 {
            let e = std::io::Error::last_os_error();
            let _ = std::fs::remove_file(path);
            return Err(Error::io("ftruncate", path, e));
        }

        Self::map(file, file_len, path).map_err(|e| {
            let _ = std::fs::remove_file(path);
            e
        })
    }

    /// Open and map an existing ring file, whatever its size; the caller
    /// validates the header against the mapped length.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io("open", path, e))?;

        let len = file
            .metadata()
            .map_err(|e| Error::io("stat", path, e))?
            .len() as usize;

        Self::map(file, len, path)
    }

    fn map(file: File, len: usize, path: &Path) -> Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::io("mmap", path, std::io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: NonNull::new(ptr as *mut u8).expect("mmap returned non-null"),
            len,
            fd: file.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Descriptor of the backing file; doubles as the lock target.
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn header(&self) -> &RingHeader {
        // Header fields are atomics; shared mutation from the peer process
        // is defined. Alignment holds because mmap returns page-aligned
        // memory and the header starts at offset 0.
        unsafe { &*(self.ptr.as_ptr() as *const RingHeader) }
    }

    /// Exclusive header access, valid only while no peer can be attached
    /// (the freshly created, still-locked file in `init`).
    pub fn header_mut(&mut self) -> &mut RingHeader {
        unsafe { &mut *(self.ptr.as_ptr() as *mut RingHeader) }
    }

    /// Base pointer of the circular data region.
    pub fn data_ptr(&self) -> *mut u8 {
        unsafe { self.ptr.as_ptr().add(crate::layout::HEADER_SIZE) }
    }
}

impl Drop for MappedRing {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
        // fd closes via OwnedFd, releasing the POSIX lock if held.
    }
}

/// Remove a file, tolerating its absence.
pub fn unlink_quiet(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io("unlink", PathBuf::from(path), e)),
    }
}
