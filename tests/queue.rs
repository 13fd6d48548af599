use lungo::{BlockingQueue, ExpiringStore};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn blocked_consumer_wakes_on_enqueue() {
    let queue: Arc<BlockingQueue<u32>> = Arc::new(BlockingQueue::new());
    let consumer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || queue.dequeue_timeout(Duration::from_secs(5)))
    };
    std::thread::sleep(Duration::from_millis(30));
    let start = Instant::now();
    queue.enqueue(7);
    assert_eq!(consumer.join().unwrap(), Some(7));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn many_producers_many_consumers_deliver_everything_once() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 500;

    let queue: Arc<BlockingQueue<u64>> = Arc::new(BlockingQueue::new());
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue.enqueue(p * PER_PRODUCER + i);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let mut got = Vec::new();
                while let Some(item) = queue.dequeue_timeout(Duration::from_millis(200)) {
                    got.push(item);
                }
                got
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    let mut all: Vec<u64> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .collect();
    all.sort_unstable();
    assert_eq!(all, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
    assert!(queue.is_empty());
}

#[test]
fn per_producer_order_is_preserved() {
    let queue: Arc<BlockingQueue<u32>> = Arc::new(BlockingQueue::new());
    let producer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || {
            for i in 0..1_000 {
                queue.enqueue(i);
            }
        })
    };
    let mut last = None;
    for _ in 0..1_000 {
        let item = queue.dequeue();
        if let Some(prev) = last {
            assert!(item > prev);
        }
        last = Some(item);
    }
    producer.join().unwrap();
}

#[test]
fn worker_publishes_results_with_lifetime() {
    let jobs: Arc<BlockingQueue<u64>> = Arc::new(BlockingQueue::new());
    let results: ExpiringStore<u64, u64> = ExpiringStore::new().unwrap();

    let worker = {
        let jobs = Arc::clone(&jobs);
        let results = results.clone();
        std::thread::spawn(move || {
            while let Some(n) = jobs.dequeue_timeout(Duration::from_millis(100)) {
                results.insert_with_lifetime(n, n * n, Duration::from_millis(250));
            }
        })
    };

    for n in 1..=5 {
        jobs.enqueue(n);
    }
    let start = Instant::now();
    while results.len() < 5 && start.elapsed() < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(results.value(&4), 16);

    worker.join().unwrap();
    assert!(
        wait_empty(&results, Duration::from_secs(2)),
        "results should expire after their lifetime"
    );
}

fn wait_empty(results: &ExpiringStore<u64, u64>, limit: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if results.is_empty() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    results.is_empty()
}
