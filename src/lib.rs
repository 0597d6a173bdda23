//! Point-to-point, cross-process byte/message channel over a
//! memory-mapped ring file.
//!
//! One process writes, one process reads; either may come and go. The
//! ring's metadata is guarded by a whole-file POSIX lock, and a pair of
//! named FIFOs ("bells") beside the ring file carry wakeup bytes (never
//! data), so a blocked peer sleeps in the kernel instead of polling.
//!
//! # Modes
//!
//! - **Byte mode** (default): `write` copies an arbitrary byte run, all
//!   or nothing; `read` drains whatever is available.
//! - **Message mode** ([`InitFlags::messages`]): each write is one
//!   length-prefixed message and each read returns exactly one.
//! - **Stomp** ([`InitFlags::stomp`]): a write that would not fit evicts
//!   the oldest buffered data (whole messages in framed mode) instead of
//!   blocking or failing.
//! - **Select-fd** ([`OpenFlags::select_fd`]): the reader integrates the
//!   ring into its own select/poll/epoll loop via
//!   [`Ring::selectable_fd`] instead of blocking inside the library.
//!
//! ```no_run
//! use shmring::{init, InitFlags, OpenFlags, Ring};
//!
//! init("/tmp/demo.ring", 4096, InitFlags { messages: true, ..Default::default() })?;
//!
//! let mut w = Ring::open("/tmp/demo.ring", OpenFlags::writer())?;
//! w.write(b"hello")?;
//!
//! let mut r = Ring::open("/tmp/demo.ring", OpenFlags::reader())?;
//! let mut buf = [0u8; 64];
//! let n = r.read(&mut buf)?;
//! assert_eq!(&buf[..n], b"hello");
//! # Ok::<(), shmring::Error>(())
//! ```

#![cfg(target_os = "linux")]

mod bell;
mod error;
pub mod layout;
mod lock;
mod map;
mod ring;

pub use error::{Error, Result};
pub use ring::{init, Ring, Stats};

/// Role of a handle; every open is exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Reader,
    Writer,
}

/// Ring creation options for [`init`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InitFlags {
    /// Replace an existing ring (file and content) at the path.
    pub overwrite: bool,
    /// Leave an existing ring at the path untouched and succeed.
    pub keep_existing: bool,
    /// Frame every transfer as one length-prefixed message.
    pub messages: bool,
    /// Evict oldest data instead of blocking/failing when full.
    pub stomp: bool,
}

/// Handle options for [`Ring::open`].
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    pub role: Role,
    /// Return `Ok(0)` instead of blocking when the ring is empty (reads)
    /// or lacks space (writes).
    pub nonblock: bool,
    /// Reader-only: expose a descriptor for an external event loop.
    /// Implies (and requires) `nonblock`.
    pub select_fd: bool,
}

impl OpenFlags {
    /// A blocking reader.
    pub fn reader() -> Self {
        Self {
            role: Role::Reader,
            nonblock: false,
            select_fd: false,
        }
    }

    /// A blocking writer.
    pub fn writer() -> Self {
        Self {
            role: Role::Writer,
            nonblock: false,
            select_fd: false,
        }
    }

    pub fn nonblock(mut self) -> Self {
        self.nonblock = true;
        self
    }

    /// Select-fd mode; valid on a non-blocking reader only.
    pub fn select_fd(mut self) -> Self {
        self.nonblock = true;
        self.select_fd = true;
        self
    }
}
