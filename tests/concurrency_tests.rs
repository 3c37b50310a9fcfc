use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use memocache::MemoCache;

#[test]
fn concurrent_misses_on_one_key_compute_exactly_once() {
    const THREADS: usize = 8;

    let cache = MemoCache::new();
    let executions = Arc::new(AtomicUsize::new(0));
    let start = Barrier::new(THREADS);

    let slow_double = {
        let executions = Arc::clone(&executions);
        cache.wrap(move |n: u64| {
            executions.fetch_add(1, Ordering::SeqCst);
            // Long enough that the other threads pile up behind the
            // in-flight marker instead of finding a completed entry.
            thread::sleep(Duration::from_millis(50));
            n * 2
        })
    };

    thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let slow_double = &slow_double;
                let start = &start;
                scope.spawn(move || {
                    start.wait();
                    slow_double.call((21,)).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
    });

    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[test]
fn computations_for_different_keys_run_in_parallel() {
    let cache = MemoCache::new();
    // Both computations must be inside the callable at the same time for
    // the barrier to release; a cache that serialized unrelated keys
    // would deadlock here.
    let rendezvous = Arc::new(Barrier::new(2));

    let meet = {
        let rendezvous = Arc::clone(&rendezvous);
        cache.wrap(move |n: u32| {
            rendezvous.wait();
            n + 1
        })
    };

    thread::scope(|scope| {
        let a = scope.spawn(|| meet.call((1,)).unwrap());
        let b = scope.spawn(|| meet.call((2,)).unwrap());
        assert_eq!(a.join().unwrap(), 2);
        assert_eq!(b.join().unwrap(), 3);
    });
}

#[test]
fn computations_for_different_callables_run_in_parallel() {
    let cache = MemoCache::new();
    let rendezvous = Arc::new(Barrier::new(2));

    let left = {
        let rendezvous = Arc::clone(&rendezvous);
        cache.wrap(move |n: u32| {
            rendezvous.wait();
            n + 10
        })
    };
    let right = {
        let rendezvous = Arc::clone(&rendezvous);
        cache.wrap(move |n: u32| {
            rendezvous.wait();
            n + 20
        })
    };

    thread::scope(|scope| {
        let a = scope.spawn(|| left.call((1,)).unwrap());
        let b = scope.spawn(|| right.call((1,)).unwrap());
        assert_eq!(a.join().unwrap(), 11);
        assert_eq!(b.join().unwrap(), 21);
    });
}

#[test]
fn waiters_retry_after_the_computing_thread_fails() {
    const THREADS: usize = 6;

    let cache = MemoCache::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let start = Barrier::new(THREADS);

    let flaky = {
        let attempts = Arc::clone(&attempts);
        cache.wrap(move |n: u32| -> Result<u32, String> {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(30));
                Err("first attempt fails".to_string())
            } else {
                Ok(n * 10)
            }
        })
    };

    let mut oks = 0;
    let mut errs = 0;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let flaky = &flaky;
                let start = &start;
                scope.spawn(move || {
                    start.wait();
                    flaky.try_call((7,))
                })
            })
            .collect();

        for handle in handles {
            match handle.join().unwrap() {
                Ok(value) => {
                    assert_eq!(value, 70);
                    oks += 1;
                }
                Err(_) => errs += 1,
            }
        }
    });

    // Exactly the thread that ran the failing attempt observes the
    // error; everyone else retries (or arrives later) and succeeds.
    assert_eq!(errs, 1);
    assert_eq!(oks, THREADS - 1);
    // The failure was not cached: the successful value is now stored.
    assert_eq!(flaky.try_call((7,)).unwrap(), 70);
}

#[test]
fn a_panicking_computation_does_not_wedge_waiters() {
    let cache = MemoCache::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(2));

    let explosive = {
        let attempts = Arc::clone(&attempts);
        cache.wrap(move |n: u32| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(30));
                panic!("first attempt panics");
            }
            n + 1
        })
    };

    thread::scope(|scope| {
        let panicker = {
            let explosive = &explosive;
            let start = Arc::clone(&start);
            scope.spawn(move || {
                start.wait();
                explosive.call((1,))
            })
        };
        let waiter = {
            let explosive = &explosive;
            let start = Arc::clone(&start);
            scope.spawn(move || {
                start.wait();
                // Give the first thread time to claim the flight.
                thread::sleep(Duration::from_millis(10));
                explosive.call((1,)).unwrap()
            })
        };

        assert!(panicker.join().is_err());
        // The waiter must wake up, retry and succeed rather than block
        // forever on the abandoned flight.
        assert_eq!(waiter.join().unwrap(), 2);
    });

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn clear_all_under_concurrent_calls_keeps_the_cache_consistent() {
    let cache = MemoCache::new();
    let double = cache.wrap(|n: u64| n * 2);

    thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let double = &double;
                let cache = &cache;
                scope.spawn(move || {
                    for i in 0..200u64 {
                        assert_eq!(double.call((i % 16,)).unwrap(), (i % 16) * 2);
                        if t == 0 && i % 50 == 0 {
                            cache.clear_all();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    });

    // Values stay correct throughout; afterwards the cache still works.
    assert_eq!(double.call((3,)).unwrap(), 6);
}
