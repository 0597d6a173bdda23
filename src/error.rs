use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by the ring library.
///
/// Two conditions are deliberately *not* errors: a non-blocking read of an
/// empty ring and a non-blocking write against insufficient space both
/// return `Ok(0)`; the caller is expected to retry later.
#[derive(Debug, Error)]
pub enum Error {
    /// `init` found an existing ring and neither overwrite nor
    /// keep-existing was requested.
    #[error("ring already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The file failed validation on attach: bad magic/version, size
    /// mismatch, out-of-range offsets, or missing FIFOs. Either corruption
    /// or a foreign file.
    #[error("invalid ring {}: {reason}", path.display())]
    InvalidRing { path: PathBuf, reason: &'static str },

    /// Payload (plus framing overhead) exceeds total ring capacity.
    /// Permanent; retrying can never succeed.
    #[error("payload of {len} bytes (+{overhead} overhead) exceeds ring capacity {capacity}")]
    TooLarge {
        len: usize,
        overhead: usize,
        capacity: usize,
    },

    /// Message mode: the caller's buffer cannot hold the next message.
    /// The message remains queued; retry with a larger buffer.
    #[error("buffer of {capacity} bytes cannot hold next message of {msg_len} bytes")]
    BufferTooSmall { capacity: usize, msg_len: usize },

    /// A blocking wait (or a lock acquisition) was woken by a signal
    /// rather than peer activity. The caller decides whether to retry.
    #[error("interrupted by signal while waiting on ring")]
    Interrupted,

    /// Invalid flag combination or argument at init/open time.
    #[error("incompatible flags: {0}")]
    IncompatibleFlags(&'static str),

    /// An underlying syscall failed for reasons outside the protocol.
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
