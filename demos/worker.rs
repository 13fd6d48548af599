//! Worker pool: jobs arrive on a blocking queue, results are published with
//! a lifetime and reported when they expire unread.
//!
//! Run with:
//!     cargo run --example worker

use lungo::{BlockingQueue, ExpiringStore};
use std::sync::Arc;
use std::time::Duration;

const WORKERS: usize = 3;
const JOBS: u64 = 12;
const RESULT_TTL: Duration = Duration::from_millis(150);

fn main() -> lungo::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let jobs: Arc<BlockingQueue<u64>> = Arc::new(BlockingQueue::new());
    let results: ExpiringStore<u64, u64> = ExpiringStore::builder()
        .thread_name("results-expiry")
        .expiration_handler(|job: &u64, result: u64| {
            println!("result for job {job} ({result}) expired unread");
        })
        .build()?;

    let workers: Vec<_> = (0..WORKERS)
        .map(|w| {
            let jobs = Arc::clone(&jobs);
            let results = results.clone();
            std::thread::spawn(move || {
                while let Some(job) = jobs.dequeue_timeout(Duration::from_millis(200)) {
                    std::thread::sleep(Duration::from_millis(10));
                    results.insert_with_lifetime(job, job * job, RESULT_TTL);
                    println!("worker {w} finished job {job}");
                }
            })
        })
        .collect();

    for job in 0..JOBS {
        jobs.enqueue(job);
    }

    // Collect the even results before they expire; the odd ones are left to
    // the expiration handler.
    std::thread::sleep(Duration::from_millis(80));
    for job in (0..JOBS).step_by(2) {
        if let Some(result) = results.take(&job) {
            println!("collected job {job}: {result}");
        }
    }

    for w in workers {
        let _ = w.join();
    }
    std::thread::sleep(RESULT_TTL * 2);

    let stats = results.stats();
    println!(
        "collected {} results, {} expired, {} still pending",
        stats.removals,
        stats.expirations,
        results.len()
    );
    Ok(())
}
