// Demo reader: drains a message ring in blocking mode until Ctrl+C.
//
//   cargo run --example reader -- /tmp/demo.ring

use shmring::{OpenFlags, Ring};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn main() -> shmring::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: {} <ring-path>", args[0]);
        std::process::exit(1);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("error setting Ctrl+C handler");

    let mut ring = Ring::open(&args[1], OpenFlags::reader())?;
    println!("reader: attached to {}", args[1]);

    let mut buf = vec![0u8; 64 * 1024];
    let mut received = 0usize;
    let start = Instant::now();

    while running.load(Ordering::SeqCst) {
        match ring.read(&mut buf) {
            Ok(0) => {}
            Ok(_) => {
                received += 1;
                if received % 100_000 == 0 {
                    println!("reader: {received} messages");
                }
            }
            // Ctrl+C lands here while blocked in the FIFO wait.
            Err(shmring::Error::Interrupted) => continue,
            Err(e) => return Err(e),
        }
    }

    let elapsed = start.elapsed();
    println!(
        "reader: {} messages in {:.2?} ({:.0} msgs/sec)",
        received,
        elapsed,
        received as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
