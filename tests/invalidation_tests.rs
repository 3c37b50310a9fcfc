use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memocache::MemoCache;

#[test]
fn clear_one_removes_exactly_one_entry() {
    let cache = MemoCache::new();
    let greet = cache.wrap(|adj: String| format!("Hello, {adj} World!"));

    greet.call(("Happy".into(),)).unwrap();
    greet.call(("Cautious".into(),)).unwrap();
    assert_eq!(cache.entry_count(), 2);

    assert!(greet.clear(("Happy".into(),)).unwrap());
    assert_eq!(cache.entry_count(), 1);

    // Only after the second clear is the cache empty.
    assert!(greet.clear(("Cautious".into(),)).unwrap());
    assert!(cache.is_empty());
}

#[test]
fn clearing_an_absent_entry_is_a_silent_noop() {
    let cache = MemoCache::new();
    let greet = cache.wrap(|adj: String| format!("Hello, {adj} World!"));

    // Nothing cached yet.
    assert!(!greet.clear(("Happy".into(),)).unwrap());

    greet.call(("Happy".into(),)).unwrap();
    assert!(greet.clear(("Happy".into(),)).unwrap());
    // Second clear of the same key: no-op, not an error.
    assert!(!greet.clear(("Happy".into(),)).unwrap());
}

#[test]
fn clear_all_is_idempotent_and_forces_recomputation() {
    let cache = MemoCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let double = {
        let calls = Arc::clone(&calls);
        cache.wrap(move |n: u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            n * 2
        })
    };

    double.call((3,)).unwrap();
    double.call((4,)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    cache.clear_all();
    assert!(cache.is_empty());
    // Twice in a row is equivalent to once.
    cache.clear_all();
    assert!(cache.is_empty());

    double.call((3,)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

struct Counter {
    base: u32,
    calls: AtomicUsize,
}

impl Counter {
    fn compute(&self, n: u32) -> u32 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.base + n
    }
}

#[test]
fn distinct_receivers_cache_under_distinct_identities() {
    let cache = MemoCache::new();
    let first = Counter {
        base: 100,
        calls: AtomicUsize::new(0),
    };
    let second = Counter {
        base: 200,
        calls: AtomicUsize::new(0),
    };

    let on_first = cache.wrap_method(Counter::compute, &first);
    let on_second = cache.wrap_method(Counter::compute, &second);
    assert_ne!(on_first.id(), on_second.id());

    // Identical arguments, different receivers: two independent entries.
    assert_eq!(on_first.call((1,)).unwrap(), 101);
    assert_eq!(on_second.call((1,)).unwrap(), 201);
    assert_eq!(cache.entry_count(), 2);

    // Clearing one receiver's entry must not affect the other.
    assert!(on_first.clear((1,)).unwrap());
    assert_eq!(on_second.call((1,)).unwrap(), 201);
    assert_eq!(second.calls.load(Ordering::SeqCst), 1);

    assert_eq!(on_first.call((1,)).unwrap(), 101);
    assert_eq!(first.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn clear_method_reaches_bound_entries_from_the_outside() {
    let cache = MemoCache::new();
    let counter = Counter {
        base: 10,
        calls: AtomicUsize::new(0),
    };

    let bound = cache.wrap_method(Counter::compute, &counter);
    bound.call((5,)).unwrap();
    assert_eq!(cache.entry_count(), 1);

    assert!(cache
        .clear_method(&Counter::compute, &counter, (5u32,))
        .unwrap());
    assert!(cache.is_empty());

    bound.call((5,)).unwrap();
    assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn clear_callable_drops_only_that_identity() {
    let cache = MemoCache::new();
    let double = cache.wrap(|n: u32| n * 2);
    let triple = cache.wrap(|n: u32| n * 3);

    double.call((1,)).unwrap();
    double.call((2,)).unwrap();
    triple.call((1,)).unwrap();

    assert_eq!(cache.clear_callable(double.id()), 2);
    assert_eq!(cache.entry_count(), 1);
    // Clearing an identity with no entries reports zero.
    assert_eq!(cache.clear_callable(double.id()), 0);
}
