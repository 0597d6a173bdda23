// Demo select-fd reader: consumes the ring from an external poll loop
// instead of the library's blocking read. On readiness, the ring is
// drained until empty before polling again.
//
//   cargo run --example select_reader -- /tmp/demo.ring

use shmring::{OpenFlags, Ring};
use std::env;

fn main() -> shmring::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: {} <ring-path>", args[0]);
        std::process::exit(1);
    }

    let mut ring = Ring::open(&args[1], OpenFlags::reader().select_fd())?;
    let fd = ring.selectable_fd()?;
    println!("select_reader: polling fd {fd}");

    let mut buf = vec![0u8; 64 * 1024];
    let mut received = 0usize;

    loop {
        let mut p = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut p, 1, 1000) };
        if rc < 0 {
            eprintln!("poll: {}", std::io::Error::last_os_error());
            break;
        }
        if rc == 0 {
            println!("select_reader: idle, {received} messages so far");
            continue;
        }

        // Readiness means "check the ring", not "one message each".
        loop {
            let n = ring.read(&mut buf)?;
            if n == 0 {
                break;
            }
            received += 1;
        }
    }
    Ok(())
}
