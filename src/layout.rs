//! On-disk layout of the ring file.
//!
//! The header sits at offset 0 of the memory-mapped file and is followed
//! immediately by `cap` bytes of circular data. The fixed fields (magic,
//! version, FIFO paths, mode flags) are written once by `init` and never
//! change; the counters and want-flags mutate on every transfer, always
//! under the whole-file lock. They are declared as atomics because another
//! process updates them through its own mapping of the same pages; the
//! lock provides the ordering, the atomics make the aliasing defined.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering::Relaxed};

/// Identifies a file as a ring. Seven ASCII bytes plus a NUL.
pub const MAGIC: [u8; 8] = *b"shmring\0";

/// Bumped on any layout change.
pub const VERSION: u32 = 1;

/// Maximum stored FIFO path length, including the NUL terminator.
pub const FIFO_PATH_MAX: usize = 128;

/// Size of the per-message length prefix in framed mode.
pub const MSG_HDR: usize = std::mem::size_of::<u64>();

/// Header size; the data region starts here and `cap` must equal
/// `file_size - HEADER_SIZE`.
pub const HEADER_SIZE: usize = std::mem::size_of::<RingHeader>();

// Global flags word. The first two bits are the wakeup handshake and
// toggle constantly; the mode bits are fixed at init.
pub const GF_WRITER_WANTS_SPACE: u32 = 1 << 0;
pub const GF_READER_WANTS_DATA: u32 = 1 << 1;
pub const GF_MESSAGES: u32 = 1 << 2;
pub const GF_STOMP: u32 = 1 << 3;

/// Cumulative i/o counters plus the start of the current stats period.
/// Reset as a unit by `Ring::stat` when a reset timestamp is supplied.
#[repr(C)]
pub struct StatBlock {
    /// Period start, seconds/nanoseconds since the epoch.
    pub start_sec: AtomicI64,
    pub start_nsec: AtomicI64,
    pub bytes_written: AtomicU64,
    pub msgs_written: AtomicU64,
    pub bytes_read: AtomicU64,
    pub msgs_read: AtomicU64,
    /// Bytes/messages evicted by stomp reclaim, never delivered.
    pub bytes_dropped: AtomicU64,
    pub msgs_dropped: AtomicU64,
}

impl StatBlock {
    pub fn reset_to(&self, sec: i64, nsec: i64) {
        self.start_sec.store(sec, Relaxed);
        self.start_nsec.store(nsec, Relaxed);
        self.bytes_written.store(0, Relaxed);
        self.msgs_written.store(0, Relaxed);
        self.bytes_read.store(0, Relaxed);
        self.msgs_read.store(0, Relaxed);
        self.bytes_dropped.store(0, Relaxed);
        self.msgs_dropped.store(0, Relaxed);
    }
}

/// The control header mapped at the start of the ring file.
///
/// Field order and widths are the file format; changing them is a version
/// bump. `tests/layout.rs` pins the offsets.
#[repr(C)]
pub struct RingHeader {
    pub magic: [u8; 8],
    pub version: u32,
    _pad0: u32,
    /// NUL-terminated path of the writer-to-reader FIFO.
    pub w2r_path: [u8; FIFO_PATH_MAX],
    /// NUL-terminated path of the reader-to-writer FIFO.
    pub r2w_path: [u8; FIFO_PATH_MAX],
    /// Want-flag handshake bits plus the mode bits, see `GF_*`.
    pub gflags: AtomicU32,
    _pad1: u32,
    pub stats: StatBlock,
    /// Data region size in bytes.
    pub cap: AtomicU64,
    /// Bytes currently buffered. Disambiguates `wpos == rpos`
    /// (empty vs full).
    pub used: AtomicU64,
    /// Next write position, always `< cap`.
    pub wpos: AtomicU64,
    /// Next read position, always `< cap`.
    pub rpos: AtomicU64,
    /// Live message count, maintained in framed mode only.
    pub msgs: AtomicU64,
}

impl RingHeader {
    pub fn cap(&self) -> usize {
        self.cap.load(Relaxed) as usize
    }

    pub fn used(&self) -> usize {
        self.used.load(Relaxed) as usize
    }

    pub fn wpos(&self) -> usize {
        self.wpos.load(Relaxed) as usize
    }

    pub fn rpos(&self) -> usize {
        self.rpos.load(Relaxed) as usize
    }

    pub fn set_used(&self, v: usize) {
        self.used.store(v as u64, Relaxed);
    }

    pub fn set_wpos(&self, v: usize) {
        self.wpos.store(v as u64, Relaxed);
    }

    pub fn set_rpos(&self, v: usize) {
        self.rpos.store(v as u64, Relaxed);
    }

    pub fn flag(&self, bit: u32) -> bool {
        self.gflags.load(Relaxed) & bit != 0
    }

    pub fn set_flag(&self, bit: u32) {
        self.gflags.fetch_or(bit, Relaxed);
    }

    pub fn clear_flag(&self, bit: u32) {
        self.gflags.fetch_and(!bit, Relaxed);
    }

    pub fn messages(&self) -> bool {
        self.flag(GF_MESSAGES)
    }

    pub fn stomp(&self) -> bool {
        self.flag(GF_STOMP)
    }

    /// Store a NUL-terminated path into one of the FIFO path slots.
    /// Fails if the path does not fit with its terminator.
    pub fn store_fifo_path(slot: &mut [u8; FIFO_PATH_MAX], path: &str) -> bool {
        let bytes = path.as_bytes();
        if bytes.len() + 1 > FIFO_PATH_MAX {
            return false;
        }
        slot[..bytes.len()].copy_from_slice(bytes);
        slot[bytes.len()] = 0;
        true
    }

    /// Read back a stored FIFO path, up to the NUL.
    pub fn load_fifo_path(slot: &[u8; FIFO_PATH_MAX]) -> PathBuf {
        let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
        PathBuf::from(String::from_utf8_lossy(&slot[..end]).into_owned())
    }
}
