// Lifecycle tests: init collision handling, attach-time validation,
// unlink cleanup.

use shmring::{init, Error, InitFlags, OpenFlags, Ring};
use std::path::PathBuf;

fn ring_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "shmring-{tag}-{}-{:08x}.ring",
        std::process::id(),
        fastrand::u32(..)
    ))
}

fn fifo_paths(ring: &PathBuf) -> (PathBuf, PathBuf) {
    let dir = ring.parent().unwrap();
    let base = ring.file_name().unwrap().to_string_lossy();
    (
        dir.join(format!(".{base}.w2r")),
        dir.join(format!(".{base}.r2w")),
    )
}

#[test]
fn init_refuses_existing_ring() {
    let path = ring_path("exists");
    init(&path, 64, InitFlags::default()).unwrap();

    match init(&path, 64, InitFlags::default()) {
        Err(Error::AlreadyExists(p)) => assert_eq!(p, path),
        other => panic!("expected AlreadyExists, got {other:?}"),
    }

    // keep_existing succeeds and leaves content alone
    let mut w = Ring::open(&path, OpenFlags::writer().nonblock()).unwrap();
    w.write(b"xyz").unwrap();
    init(
        &path,
        64,
        InitFlags {
            keep_existing: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(w.stat(None).unwrap().used, 3);

    // overwrite replaces the ring wholesale
    init(
        &path,
        32,
        InitFlags {
            overwrite: true,
            ..Default::default()
        },
    )
    .unwrap();
    let mut r = Ring::open(&path, OpenFlags::reader().nonblock()).unwrap();
    let st = r.stat(None).unwrap();
    assert_eq!(st.used, 0);
    assert_eq!(st.capacity, 32);

    r.unlink().unwrap();
}

#[test]
fn init_rejects_incompatible_flags() {
    let path = ring_path("badflags");
    let err = init(
        &path,
        64,
        InitFlags {
            overwrite: true,
            keep_existing: true,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::IncompatibleFlags(_)));

    let err = init(&path, 0, InitFlags::default()).unwrap_err();
    assert!(matches!(err, Error::IncompatibleFlags(_)));
    assert!(!path.exists());
}

#[test]
fn init_creates_fifo_pair() {
    let path = ring_path("fifos");
    init(&path, 64, InitFlags::default()).unwrap();

    let (w2r, r2w) = fifo_paths(&path);
    use std::os::unix::fs::FileTypeExt;
    assert!(std::fs::metadata(&w2r).unwrap().file_type().is_fifo());
    assert!(std::fs::metadata(&r2w).unwrap().file_type().is_fifo());

    let r = Ring::open(&path, OpenFlags::reader().nonblock()).unwrap();
    r.unlink().unwrap();
    assert!(!path.exists());
    assert!(!w2r.exists());
    assert!(!r2w.exists());
}

#[test]
fn open_rejects_foreign_file() {
    let path = ring_path("foreign");
    std::fs::write(&path, vec![0u8; 4096]).unwrap();

    match Ring::open(&path, OpenFlags::reader()) {
        Err(Error::InvalidRing { .. }) => {}
        other => panic!("expected InvalidRing, got {:?}", other.err()),
    }
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn open_rejects_truncated_file() {
    let path = ring_path("tiny");
    std::fs::write(&path, b"shmring\0").unwrap();

    assert!(matches!(
        Ring::open(&path, OpenFlags::reader()),
        Err(Error::InvalidRing { .. })
    ));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn open_rejects_inconsistent_cursors() {
    use memoffset::offset_of;
    use shmring::layout::RingHeader;
    use std::io::{Seek, SeekFrom, Write};

    let path = ring_path("skew");
    init(&path, 64, InitFlags::default()).unwrap();
    let mut w = Ring::open(&path, OpenFlags::writer().nonblock()).unwrap();
    w.write(b"abcde").unwrap();
    drop(w);

    // Bump the fill level on disk so it no longer matches the gap
    // between the cursors.
    let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    f.seek(SeekFrom::Start(offset_of!(RingHeader, used) as u64))
        .unwrap();
    f.write_all(&7u64.to_ne_bytes()).unwrap();
    drop(f);

    assert!(matches!(
        Ring::open(&path, OpenFlags::reader()),
        Err(Error::InvalidRing { .. })
    ));

    std::fs::remove_file(&path).unwrap();
    let (w2r, r2w) = fifo_paths(&path);
    let _ = std::fs::remove_file(w2r);
    let _ = std::fs::remove_file(r2w);
}

#[test]
fn open_rejects_missing_fifo() {
    let path = ring_path("nofifo");
    init(&path, 64, InitFlags::default()).unwrap();
    let (w2r, _) = fifo_paths(&path);
    std::fs::remove_file(&w2r).unwrap();

    assert!(matches!(
        Ring::open(&path, OpenFlags::reader()),
        Err(Error::InvalidRing { .. })
    ));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn select_fd_requires_nonblocking_reader() {
    let path = ring_path("selflags");
    init(&path, 64, InitFlags::default()).unwrap();

    let flags = OpenFlags {
        role: shmring::Role::Writer,
        nonblock: true,
        select_fd: true,
    };
    assert!(matches!(
        Ring::open(&path, flags),
        Err(Error::IncompatibleFlags(_))
    ));

    let flags = OpenFlags {
        role: shmring::Role::Reader,
        nonblock: false,
        select_fd: true,
    };
    assert!(matches!(
        Ring::open(&path, flags),
        Err(Error::IncompatibleFlags(_))
    ));

    let r = Ring::open(&path, OpenFlags::reader().select_fd()).unwrap();
    assert!(r.selectable_fd().is_ok());
    r.unlink().unwrap();
}

#[test]
fn role_is_enforced_per_handle() {
    let path = ring_path("roles");
    init(&path, 64, InitFlags::default()).unwrap();

    let mut w = Ring::open(&path, OpenFlags::writer().nonblock()).unwrap();
    let mut r = Ring::open(&path, OpenFlags::reader().nonblock()).unwrap();

    let mut buf = [0u8; 8];
    assert!(matches!(
        w.read(&mut buf),
        Err(Error::IncompatibleFlags(_))
    ));
    assert!(matches!(r.write(b"x"), Err(Error::IncompatibleFlags(_))));

    r.unlink().unwrap();
}
