// Byte-mode transfer tests: the all-or-nothing write contract, wraparound
// arithmetic, and capacity conservation over many cycles.

use shmring::{init, Error, InitFlags, OpenFlags, Ring};
use std::path::PathBuf;

fn ring_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "shmring-{tag}-{}-{:08x}.ring",
        std::process::id(),
        fastrand::u32(..)
    ))
}

fn open_pair(path: &PathBuf) -> (Ring, Ring) {
    let w = Ring::open(path, OpenFlags::writer().nonblock()).unwrap();
    let r = Ring::open(path, OpenFlags::reader().nonblock()).unwrap();
    (w, r)
}

#[test]
fn six_byte_ring_scenario() {
    let path = ring_path("sixbyte");
    init(&path, 6, InitFlags::default()).unwrap();
    let (mut w, mut r) = open_pair(&path);

    assert_eq!(w.write(b"abc").unwrap(), 3);
    assert_eq!(w.write(b"def").unwrap(), 3);
    assert_eq!(w.stat(None).unwrap().used, 6);

    // Full ring: non-blocking write transfers nothing, reports no error.
    assert_eq!(w.write(b"g").unwrap(), 0);
    assert_eq!(w.stat(None).unwrap().used, 6);

    let mut buf = [0u8; 10];
    assert_eq!(r.read(&mut buf).unwrap(), 6);
    assert_eq!(&buf[..6], b"abcdef");
    assert_eq!(r.stat(None).unwrap().used, 0);

    r.unlink().unwrap();
}

#[test]
fn writes_never_partial() {
    let path = ring_path("atomic");
    init(&path, 8, InitFlags::default()).unwrap();
    let (mut w, mut r) = open_pair(&path);

    assert_eq!(w.write(b"12345").unwrap(), 5);
    // 3 bytes free; a 4-byte write must transfer zero, not 3.
    assert_eq!(w.write(b"wxyz").unwrap(), 0);
    assert_eq!(w.stat(None).unwrap().used, 5);

    let mut buf = [0u8; 8];
    assert_eq!(r.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"12345");

    r.unlink().unwrap();
}

#[test]
fn oversize_write_fails_regardless_of_occupancy() {
    let path = ring_path("oversize");
    init(&path, 4, InitFlags::default()).unwrap();
    let (mut w, r) = open_pair(&path);

    assert!(matches!(w.write(b"12345"), Err(Error::TooLarge { .. })));
    // Still rejected with the ring completely empty.
    assert_eq!(w.stat(None).unwrap().used, 0);

    assert!(matches!(
        w.write(b""),
        Err(Error::IncompatibleFlags(_))
    ));

    r.unlink().unwrap();
}

#[test]
fn read_returns_zero_on_empty_nonblocking() {
    let path = ring_path("empty");
    init(&path, 16, InitFlags::default()).unwrap();
    let (_w, mut r) = open_pair(&path);

    let mut buf = [0u8; 4];
    assert_eq!(r.read(&mut buf).unwrap(), 0);
    r.unlink().unwrap();
}

#[test]
fn short_read_buffer_drains_in_pieces() {
    let path = ring_path("pieces");
    init(&path, 16, InitFlags::default()).unwrap();
    let (mut w, mut r) = open_pair(&path);

    w.write(b"abcdefgh").unwrap();

    let mut buf = [0u8; 3];
    assert_eq!(r.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf, b"abc");
    assert_eq!(r.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf, b"def");
    assert_eq!(r.read(&mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], b"gh");
    assert_eq!(r.read(&mut buf).unwrap(), 0);

    r.unlink().unwrap();
}

#[test]
fn wraparound_preserves_bytes_and_conserves_capacity() {
    let path = ring_path("wrap");
    let cap = 23; // odd size so positions drift across the boundary
    init(&path, cap, InitFlags::default()).unwrap();
    let (mut w, mut r) = open_pair(&path);

    let mut written = 0u64;
    let mut read_back = Vec::new();
    let mut expected = Vec::new();

    for round in 0..200u32 {
        let chunk: Vec<u8> = (0..(1 + (round % 7) as usize))
            .map(|i| (round as u8).wrapping_add(i as u8))
            .collect();
        let n = w.write(&chunk).unwrap();
        if n > 0 {
            assert_eq!(n, chunk.len());
            written += n as u64;
            expected.extend_from_slice(&chunk);
        }

        let st = w.stat(None).unwrap();
        assert_eq!(st.used as u64, st.bytes_written - st.bytes_read);
        assert!(st.used <= cap);

        let mut buf = [0u8; 5];
        let n = r.read(&mut buf).unwrap();
        read_back.extend_from_slice(&buf[..n]);
    }

    // Drain the remainder.
    loop {
        let mut buf = [0u8; 8];
        let n = r.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        read_back.extend_from_slice(&buf[..n]);
    }

    assert_eq!(read_back, expected);
    let st = r.stat(None).unwrap();
    assert_eq!(st.bytes_written, written);
    assert_eq!(st.bytes_read, written);
    assert_eq!(st.used, 0);

    r.unlink().unwrap();
}

#[test]
fn randomized_byte_stream_round_trip() {
    let path = ring_path("rand");
    init(&path, 61, InitFlags::default()).unwrap();
    let (mut w, mut r) = open_pair(&path);

    let mut expected = Vec::new();
    let mut got = Vec::new();

    for _ in 0..500 {
        let len = fastrand::usize(1..20);
        let chunk: Vec<u8> = (0..len).map(|_| fastrand::u8(..)).collect();
        if w.write(&chunk).unwrap() > 0 {
            expected.extend_from_slice(&chunk);
        }

        let mut buf = [0u8; 17];
        let n = r.read(&mut buf).unwrap();
        got.extend_from_slice(&buf[..n]);
    }
    loop {
        let mut buf = [0u8; 32];
        let n = r.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        got.extend_from_slice(&buf[..n]);
    }

    assert_eq!(got, expected);
    r.unlink().unwrap();
}
