// Demo writer: creates a message ring and pushes N payloads through it,
// blocking whenever the reader falls behind.
//
// Run the reader in another terminal:
//   cargo run --example writer -- /tmp/demo.ring 100000
//   cargo run --example reader -- /tmp/demo.ring

use shmring::{init, InitFlags, OpenFlags, Ring};
use std::env;
use std::time::Instant;

fn main() -> shmring::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <ring-path> <num_messages>", args[0]);
        std::process::exit(1);
    }
    let path = &args[1];
    let num_messages: usize = args[2].parse().expect("invalid message count");

    let payload = vec![0xabu8; 361];
    init(
        path,
        64 * 1024,
        InitFlags {
            overwrite: true,
            messages: true,
            ..Default::default()
        },
    )?;
    println!("writer: ring created at {path}");

    let mut ring = Ring::open(path, OpenFlags::writer())?;
    let start = Instant::now();
    let mut sent = 0usize;

    while sent < num_messages {
        match ring.write(&payload) {
            Ok(_) => sent += 1,
            Err(shmring::Error::Interrupted) => continue,
            Err(e) => return Err(e),
        }
    }

    let elapsed = start.elapsed();
    println!(
        "writer: {} messages in {:.2?} ({:.0} msgs/sec)",
        sent,
        elapsed,
        sent as f64 / elapsed.as_secs_f64()
    );

    let st = ring.stat(None)?;
    println!(
        "writer: ring used {}/{} bytes, {} messages pending",
        st.used, st.capacity, st.messages
    );
    Ok(())
}
