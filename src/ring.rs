//! Ring lifecycle and the transfer engine.
//!
//! `init` creates the backing file and FIFOs; `Ring::open` attaches a
//! process-local handle; `write`/`read` move data under the whole-file
//! lock, blocking (when asked to) by reading the complementary FIFO with
//! the lock released. Writes are all or nothing. In framed mode every
//! unit is one length-prefixed message; the prefix itself may straddle
//! the wrap boundary and is reassembled byte-wise.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr;
use std::time::{SystemTime, UNIX_EPOCH};

use std::sync::atomic::Ordering::Relaxed;

use crate::bell;
use crate::error::{Error, Result};
use crate::layout::{
    RingHeader, GF_MESSAGES, GF_READER_WANTS_DATA, GF_STOMP, GF_WRITER_WANTS_SPACE, HEADER_SIZE,
    MAGIC, MSG_HDR, VERSION,
};
use crate::lock::FileLock;
use crate::map::{self, MappedRing};
use crate::{InitFlags, OpenFlags, Role};

/// Snapshot of the ring's cumulative and instantaneous counters,
/// taken under the lock by [`Ring::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    /// Start of the current stats period.
    pub period_start: SystemTime,
    pub bytes_written: u64,
    pub msgs_written: u64,
    pub bytes_read: u64,
    pub msgs_read: u64,
    /// Evicted by stomp reclaim, never delivered.
    pub bytes_dropped: u64,
    pub msgs_dropped: u64,
    /// Data region size in bytes.
    pub capacity: usize,
    /// Bytes currently buffered.
    pub used: usize,
    /// Messages currently buffered (framed mode).
    pub messages: u64,
}

/// Process-local handle to an open ring, one per role. Closing (dropping)
/// it releases the mapping and descriptors; the file lock goes with the
/// descriptor.
pub struct Ring {
    path: PathBuf,
    map: MappedRing,
    /// Writer-to-reader FIFO: the writer rings it, the reader waits on it.
    w2r: OwnedFd,
    /// Reader-to-writer FIFO: the reader rings it, the writer waits on it.
    r2w: OwnedFd,
    flags: OpenFlags,
}

/// Create a ring file of `capacity` data bytes plus its FIFO pair.
///
/// Succeeds only if the file is created new, unless `overwrite` (replace
/// an existing ring) or `keep_existing` (leave an existing ring untouched)
/// is set. Concurrent `init` races on one path are settled by the
/// exclusive create; the loser gets [`Error::AlreadyExists`].
pub fn init(path: impl AsRef<Path>, capacity: usize, flags: InitFlags) -> Result<()> {
    let path = path.as_ref();

    if flags.overwrite && flags.keep_existing {
        return Err(Error::IncompatibleFlags(
            "overwrite and keep_existing are mutually exclusive",
        ));
    }
    if capacity == 0 {
        return Err(Error::IncompatibleFlags("capacity must be at least one byte"));
    }

    if path.exists() {
        if flags.overwrite {
            map::unlink_quiet(path)?;
        } else if flags.keep_existing {
            return Ok(());
        } else {
            return Err(Error::AlreadyExists(path.to_path_buf()));
        }
    }

    let mut mapped = MappedRing::create(path, HEADER_SIZE + capacity)?;
    match init_header(path, &mut mapped, capacity, flags) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), capacity, "ring created");
            Ok(())
        }
        Err(e) => {
            // Never leave a half-initialized ring behind.
            let _ = std::fs::remove_file(path);
            Err(e)
        }
    }
}

fn init_header(
    path: &Path,
    mapped: &mut MappedRing,
    capacity: usize,
    flags: InitFlags,
) -> Result<()> {
    // Held until return; the mapping's descriptor releases it on close.
    let _lock = FileLock::acquire(mapped.raw_fd())?;

    let (w2r, r2w) = bell::fifo_paths(path)?;

    let header = mapped.header_mut();
    header.magic = MAGIC;
    header.version = VERSION;

    if !RingHeader::store_fifo_path(&mut header.w2r_path, &w2r.to_string_lossy())
        || !RingHeader::store_fifo_path(&mut header.r2w_path, &r2w.to_string_lossy())
    {
        return Err(Error::IncompatibleFlags("ring path too long for header"));
    }

    let mut gf = 0u32;
    if flags.messages {
        gf |= GF_MESSAGES;
    }
    if flags.stomp {
        gf |= GF_STOMP;
    }
    header.gflags.store(gf, Relaxed);

    header.cap.store(capacity as u64, Relaxed);
    header.used.store(0, Relaxed);
    header.wpos.store(0, Relaxed);
    header.rpos.store(0, Relaxed);
    header.msgs.store(0, Relaxed);

    let (sec, nsec) = now_epoch();
    header.stats.reset_to(sec, nsec);

    bell::create_pair(&w2r, &r2w)
}

impl Ring {
    /// Attach to an existing ring. The role decides which FIFO end this
    /// process genuinely blocks on; the other end is made non-blocking so
    /// ringing an absent or saturated peer never blocks the signaler.
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags) -> Result<Self> {
        let path = path.as_ref();

        if flags.select_fd && (flags.role != Role::Reader || !flags.nonblock) {
            return Err(Error::IncompatibleFlags(
                "select_fd requires a non-blocking reader",
            ));
        }

        let mapped = MappedRing::open(path)?;
        validate(path, &mapped)?;

        let header = mapped.header();
        let w2r_path = RingHeader::load_fifo_path(&header.w2r_path);
        let r2w_path = RingHeader::load_fifo_path(&header.r2w_path);

        let w2r = bell::open_rw(&w2r_path)?;
        let r2w = bell::open_rw(&r2w_path)?;

        let ring = Self {
            path: path.to_path_buf(),
            map: mapped,
            w2r,
            r2w,
            flags,
        };

        match flags.role {
            Role::Reader => {
                // We only signal on r2w; the writer may be absent.
                bell::set_nonblocking(ring.r2w.as_raw_fd())
                    .map_err(|e| Error::io("fcntl", &r2w_path, e))?;
                if flags.select_fd {
                    bell::set_nonblocking(ring.w2r.as_raw_fd())
                        .map_err(|e| Error::io("fcntl", &w2r_path, e))?;
                    ring.prime_select_fd()?;
                }
            }
            Role::Writer => {
                // We only signal on w2r; the reader may be absent.
                bell::set_nonblocking(ring.w2r.as_raw_fd())
                    .map_err(|e| Error::io("fcntl", &w2r_path, e))?;
            }
        }

        tracing::debug!(path = %path.display(), role = ?flags.role, "ring opened");
        Ok(ring)
    }

    /// In select-fd mode the reader never enters the library's own
    /// blocking wait, so the want-data flag stays set permanently and the
    /// exposed descriptor is primed with one wakeup byte if the ring
    /// already holds data.
    fn prime_select_fd(&self) -> Result<()> {
        let header = self.header();
        header.set_flag(GF_READER_WANTS_DATA);
        if header.used() > 0 {
            bell::ring(&self.w2r).map_err(|e| Error::io("write", &self.path, e))?;
        }
        Ok(())
    }

    /// Write the whole buffer into the ring, or nothing.
    ///
    /// Returns `Ok(len)` once the full buffer (one framed message in
    /// message mode) is committed, `Ok(0)` if a non-blocking handle found
    /// insufficient space, [`Error::TooLarge`] if the buffer can never
    /// fit, or [`Error::Interrupted`] if a signal arrived while blocked.
    /// With stomp enabled, the oldest buffered data is evicted instead of
    /// waiting.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.write_all(&[buf])
    }

    /// Commit a batch of buffers under one lock acquisition, all or
    /// nothing for the whole batch. In framed mode each buffer becomes
    /// its own message; empty buffers are rejected like any other
    /// zero-length write. Returns the total payload bytes written.
    pub fn write_vectored(&mut self, bufs: &[&[u8]]) -> Result<usize> {
        self.write_all(bufs)
    }

    fn write_all(&mut self, bufs: &[&[u8]]) -> Result<usize> {
        if self.flags.role != Role::Writer {
            return Err(Error::IncompatibleFlags("write on a read-only handle"));
        }
        let header = self.header();
        let hdr = if header.messages() { MSG_HDR } else { 0 };
        let cap = header.cap();

        // Every buffer must carry payload. An empty element would commit
        // a zero-length framed message, which a reader cannot tell apart
        // from an empty ring.
        if bufs.is_empty() || bufs.iter().any(|b| b.is_empty()) {
            return Err(Error::IncompatibleFlags("zero-length write"));
        }
        let len: usize = bufs.iter().map(|b| b.len()).sum();
        let need = len + hdr * bufs.len();
        if need > cap {
            return Err(Error::TooLarge {
                len,
                overhead: need - len,
                capacity: cap,
            });
        }

        loop {
            let guard = FileLock::acquire(self.map.raw_fd())?;

            let free = cap - header.used();
            if need > free {
                if header.stomp() {
                    // Sacrifice the oldest data; cannot fail since the
                    // batch fits in total capacity.
                    self.reclaim(need - free);
                } else if self.flags.nonblock {
                    return Ok(0);
                } else {
                    header.set_flag(GF_WRITER_WANTS_SPACE);
                    drop(guard);
                    bell::wait(&self.r2w, &self.path)?;
                    continue;
                }
            }

            let mut pos = header.wpos();
            for buf in bufs {
                if hdr > 0 {
                    pos = self.copy_in(pos, &(buf.len() as u64).to_ne_bytes());
                }
                pos = self.copy_in(pos, buf);
            }
            header.set_wpos(pos);
            header.set_used(header.used() + need);

            header.clear_flag(GF_WRITER_WANTS_SPACE);
            if header.flag(GF_READER_WANTS_DATA) {
                bell::ring(&self.w2r).map_err(|e| Error::io("write", &self.path, e))?;
            }

            header.stats.bytes_written.fetch_add(need as u64, Relaxed);
            if hdr > 0 {
                let n = bufs.len() as u64;
                header.stats.msgs_written.fetch_add(n, Relaxed);
                header.msgs.fetch_add(n, Relaxed);
            }
            return Ok(len);
        }
    }

    /// Read the next unit of data from the ring.
    ///
    /// Byte mode returns up to `buf.len()` currently-available bytes;
    /// framed mode returns exactly one whole message, or
    /// [`Error::BufferTooSmall`] (leaving the message queued) if `buf`
    /// is short. An empty ring returns `Ok(0)` on a non-blocking handle
    /// and otherwise blocks until the writer rings, surfacing
    /// [`Error::Interrupted`] if a signal arrives first.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.flags.role != Role::Reader {
            return Err(Error::IncompatibleFlags("read on a write-only handle"));
        }
        if buf.is_empty() {
            return Err(Error::IncompatibleFlags("zero-length read buffer"));
        }
        let header = self.header();
        let framed = header.messages();

        loop {
            let guard = FileLock::acquire(self.map.raw_fd())?;

            let used = header.used();
            let nr;
            if used == 0 {
                nr = 0;
            } else if framed {
                if used < MSG_HDR {
                    return Err(self.corrupt("partial message header in ring"));
                }
                let msg_len = self.peek_len(header.rpos()) as usize;
                if MSG_HDR + msg_len > used {
                    return Err(self.corrupt("message length exceeds buffered data"));
                }
                if buf.len() < msg_len {
                    return Err(Error::BufferTooSmall {
                        capacity: buf.len(),
                        msg_len,
                    });
                }
                let pos = self.advance(header.rpos(), MSG_HDR);
                let pos = self.copy_out(pos, &mut buf[..msg_len]);
                header.set_rpos(pos);
                header.set_used(used - MSG_HDR - msg_len);
                nr = msg_len;
            } else {
                nr = buf.len().min(used);
                let pos = self.copy_out(header.rpos(), &mut buf[..nr]);
                header.set_rpos(pos);
                header.set_used(used - nr);
            }

            if self.flags.select_fd {
                // Keep the caller's level-triggered loop honest: eat one
                // wakeup byte per read, never more, and leave want-data
                // set so the writer always notifies.
                bell::drain_one(&self.w2r).map_err(|e| Error::io("read", &self.path, e))?;
            } else if nr > 0 {
                header.clear_flag(GF_READER_WANTS_DATA);
            }

            if nr > 0 {
                if header.flag(GF_WRITER_WANTS_SPACE) {
                    bell::ring(&self.r2w).map_err(|e| Error::io("write", &self.path, e))?;
                }
                let hdr = if framed { MSG_HDR } else { 0 };
                header.stats.bytes_read.fetch_add((nr + hdr) as u64, Relaxed);
                if framed {
                    header.stats.msgs_read.fetch_add(1, Relaxed);
                    header.msgs.fetch_sub(1, Relaxed);
                }
                return Ok(nr);
            }

            if self.flags.nonblock {
                return Ok(0);
            }

            header.set_flag(GF_READER_WANTS_DATA);
            drop(guard);
            bell::wait(&self.w2r, &self.path)?;
        }
    }

    /// Snapshot the ring's statistics. If `reset` is given, the
    /// cumulative counters are zeroed and the new period starts at that
    /// time; the data offsets are untouched.
    pub fn stat(&mut self, reset: Option<SystemTime>) -> Result<Stats> {
        let _lock = FileLock::acquire(self.map.raw_fd())?;
        let header = self.header();
        let s = &header.stats;

        let start = UNIX_EPOCH
            + std::time::Duration::new(
                s.start_sec.load(Relaxed).max(0) as u64,
                s.start_nsec.load(Relaxed).max(0) as u32,
            );
        let out = Stats {
            period_start: start,
            bytes_written: s.bytes_written.load(Relaxed),
            msgs_written: s.msgs_written.load(Relaxed),
            bytes_read: s.bytes_read.load(Relaxed),
            msgs_read: s.msgs_read.load(Relaxed),
            bytes_dropped: s.bytes_dropped.load(Relaxed),
            msgs_dropped: s.msgs_dropped.load(Relaxed),
            capacity: header.cap(),
            used: header.used(),
            messages: header.msgs.load(Relaxed),
        };

        if let Some(t) = reset {
            let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
            s.reset_to(d.as_secs() as i64, d.subsec_nanos() as i64);
        }
        Ok(out)
    }

    /// Descriptor for external select/poll/epoll loops. Only available on
    /// a handle opened in select-fd mode. Readability means "call
    /// [`Ring::read`] until it returns `Ok(0)`", nothing stronger.
    pub fn selectable_fd(&self) -> Result<RawFd> {
        if !self.flags.select_fd {
            return Err(Error::IncompatibleFlags(
                "selectable_fd requires select_fd mode",
            ));
        }
        Ok(self.w2r.as_raw_fd())
    }

    /// Remove the backing file and both FIFOs. Expected to be called once
    /// no other process holds an open handle; existing mappings stay
    /// valid until dropped.
    pub fn unlink(&self) -> Result<()> {
        let header = self.header();
        map::unlink_quiet(&self.path)?;
        map::unlink_quiet(&RingHeader::load_fifo_path(&header.w2r_path))?;
        map::unlink_quiet(&RingHeader::load_fifo_path(&header.r2w_path))?;
        tracing::debug!(path = %self.path.display(), "ring unlinked");
        Ok(())
    }

    /// Path this handle was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header(&self) -> &RingHeader {
        self.map.header()
    }

    fn corrupt(&self, reason: &'static str) -> Error {
        Error::InvalidRing {
            path: self.path.clone(),
            reason,
        }
    }

    /// Forcibly reclaim at least `delta` bytes from the oldest end of the
    /// ring (stomp mode, under the lock). Framed rings evict whole
    /// messages only, so the reclaimed amount may overshoot.
    fn reclaim(&self, delta: usize) {
        let header = self.header();
        let mut reclaimed = delta;

        if header.messages() {
            let mut pos = header.rpos();
            let mut dropped_bytes = 0usize;
            let mut dropped_msgs = 0u64;
            while dropped_bytes < delta {
                let msg_len = self.peek_len(pos) as usize + MSG_HDR;
                debug_assert!(dropped_bytes + msg_len <= header.used());
                pos = self.advance(pos, msg_len);
                dropped_bytes += msg_len;
                dropped_msgs += 1;
            }
            header.stats.msgs_dropped.fetch_add(dropped_msgs, Relaxed);
            header.msgs.fetch_sub(dropped_msgs, Relaxed);
            reclaimed = dropped_bytes;
        }

        header.set_rpos(self.advance(header.rpos(), reclaimed));
        header.set_used(header.used() - reclaimed);
        header
            .stats
            .bytes_dropped
            .fetch_add(reclaimed as u64, Relaxed);
    }

    fn advance(&self, pos: usize, by: usize) -> usize {
        (pos + by) % self.header().cap()
    }

    /// Copy `src` into the data region at `pos`, wrapping at the
    /// boundary. Returns the new position. Caller holds the lock and has
    /// verified free space.
    fn copy_in(&self, pos: usize, src: &[u8]) -> usize {
        let cap = self.header().cap();
        let data = self.map.data_ptr();
        let first = src.len().min(cap - pos);
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), data.add(pos), first);
            if first < src.len() {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), data, src.len() - first);
            }
        }
        (pos + src.len()) % cap
    }

    /// Copy out of the data region at `pos` into `dst`, wrapping at the
    /// boundary. Returns the new position. Caller holds the lock and has
    /// verified availability.
    fn copy_out(&self, pos: usize, dst: &mut [u8]) -> usize {
        let cap = self.header().cap();
        let data = self.map.data_ptr();
        let first = dst.len().min(cap - pos);
        unsafe {
            ptr::copy_nonoverlapping(data.add(pos), dst.as_mut_ptr(), first);
            if first < dst.len() {
                ptr::copy_nonoverlapping(data, dst.as_mut_ptr().add(first), dst.len() - first);
            }
        }
        (pos + dst.len()) % cap
    }

    /// Read the length prefix at `pos`; the prefix itself may straddle
    /// the wrap boundary.
    fn peek_len(&self, pos: usize) -> u64 {
        let mut raw = [0u8; MSG_HDR];
        self.copy_out(pos, &mut raw);
        u64::from_ne_bytes(raw)
    }
}

/// Attach-time invariant checks: size, magic, version, counters in
/// range, capacity matching the file size, and a FIFO pair that exists
/// and really is a pair of FIFOs.
fn validate(path: &Path, mapped: &MappedRing) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let invalid = |reason| Error::InvalidRing {
        path: path.to_path_buf(),
        reason,
    };

    if mapped.len() < HEADER_SIZE + 1 {
        return Err(invalid("file smaller than minimum ring size"));
    }
    let header = mapped.header();
    if header.magic != MAGIC {
        return Err(invalid("bad magic"));
    }
    if header.version != VERSION {
        return Err(invalid("version mismatch"));
    }
    let cap = header.cap();
    if cap != mapped.len() - HEADER_SIZE {
        return Err(invalid("capacity does not match file size"));
    }
    if header.used() > cap {
        return Err(invalid("used exceeds capacity"));
    }
    if header.wpos() >= cap {
        return Err(invalid("write position out of range"));
    }
    if header.rpos() >= cap {
        return Err(invalid("read position out of range"));
    }
    // Cursor consistency: the cursor gap must equal the fill level.
    // Empty and full both collapse to wpos == rpos, so only the strictly
    // partial case is decidable.
    let used = header.used();
    if used != 0 && used != cap && (header.wpos() + cap - header.rpos()) % cap != used {
        return Err(invalid("cursor gap disagrees with used count"));
    }

    for slot in [&header.w2r_path, &header.r2w_path] {
        let fifo = RingHeader::load_fifo_path(slot);
        match std::fs::metadata(&fifo) {
            Ok(m) if m.file_type().is_fifo() => {}
            Ok(_) => return Err(invalid("bell path is not a fifo")),
            Err(_) => return Err(invalid("bell fifo missing")),
        }
    }
    Ok(())
}

fn now_epoch() -> (i64, i64) {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (d.as_secs() as i64, d.subsec_nanos() as i64)
}
