//! The memoization cache itself.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::KeyError;
use crate::identity::CallableId;
use crate::key::{CallArgs, CallKey, KeyPolicy};
use crate::value::CacheValue;
use crate::wrap::{BoundMemoized, Callable, Memoized, Method};

#[cfg(feature = "stats")]
use crate::stats::CacheStats;

/// Type-erased stored value. Entries for different callables carry
/// different result types, so the map stores `dyn Any` and the typed
/// fetch path downcasts.
trait ErasedValue: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> ErasedValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Coordination handle for one in-flight computation. Waiters block on
/// the condvar; the computing thread flips `done` exactly once, on
/// success or failure, and wakes everyone.
struct Flight {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn finish(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }
}

enum Slot {
    Ready(Box<dyn ErasedValue>),
    InFlight(Arc<Flight>),
}

/// Per-identity entry map. The mutex guards only map structure; the
/// user's computation always runs with no lock held, so slow computations
/// for one key never block lookups of another.
#[derive(Default)]
struct FnEntries {
    slots: Mutex<HashMap<CallKey, Slot>>,
}

impl FnEntries {
    fn ready_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }
}

/// Configures and builds a [`MemoCache`].
///
/// # Examples
///
/// ```
/// use memocache::MemoCache;
///
/// let cache = MemoCache::builder()
///     .allow_hash_fallback(false)
///     .deep_copy_isolation(false)
///     .build();
/// # let _ = cache;
/// ```
#[derive(Clone, Copy, Debug)]
pub struct MemoCacheBuilder {
    allow_hash_fallback: bool,
    deep_copy_isolation: bool,
}

impl Default for MemoCacheBuilder {
    fn default() -> Self {
        Self {
            allow_hash_fallback: true,
            deep_copy_isolation: true,
        }
    }
}

impl MemoCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit identity/bit-pattern key fragments for values with no
    /// structural key (floats, [`ByAddress`](crate::ByAddress)).
    /// Defaults to `true`; when disabled, such arguments fail with
    /// [`KeyError::Unhashable`] before any computation runs.
    pub fn allow_hash_fallback(mut self, allow: bool) -> Self {
        self.allow_hash_fallback = allow;
        self
    }

    /// Hand out structurally independent copies of cached values
    /// ([`CacheValue::isolate`]). Defaults to `true`; when disabled,
    /// hand-outs use plain `Clone`, which for `Arc`-style values shares
    /// interior state with the cache.
    pub fn deep_copy_isolation(mut self, isolate: bool) -> Self {
        self.deep_copy_isolation = isolate;
        self
    }

    pub fn build(self) -> MemoCache {
        MemoCache {
            entries: DashMap::new(),
            policy: KeyPolicy {
                allow_hash_fallback: self.allow_hash_fallback,
            },
            deep_copy_isolation: self.deep_copy_isolation,
            #[cfg(feature = "stats")]
            stats: CacheStats::new(),
        }
    }
}

/// A thread-safe memoization cache shared by any number of callables.
///
/// Entries live under a two-level map: [`CallableId`] partitions the
/// cache per callable (or per bound receiver), and within one callable a
/// [`CallKey`], normalized from the invocation's arguments, selects the
/// stored result. There is no eviction, expiry or persistence: entries
/// stay until explicitly cleared.
///
/// # Concurrency
///
/// * The outer map is a [`DashMap`]; identity insertion and removal never
///   block lookups under other identities.
/// * Each identity's entry map is guarded by a `parking_lot::Mutex` that
///   is held only for map structure, never across a computation.
/// * Concurrent misses on the same `(identity, key)` collapse into a
///   single computation: one caller computes, the rest block on a per-key
///   flight marker and then read the stored result. Computations for
///   different keys run fully in parallel.
/// * A failed or panicked computation removes its flight marker without
///   storing anything; blocked callers wake and retry with their own
///   computation.
///
/// # Examples
///
/// ```
/// use memocache::MemoCache;
///
/// let cache = MemoCache::new();
/// let greet = cache.wrap(|adj: String| format!("Hello, {adj} World!"));
///
/// assert_eq!(greet.call(("Happy".into(),)).unwrap(), "Hello, Happy World!");
/// // Served from cache; the closure does not run again.
/// assert_eq!(greet.call(("Happy".into(),)).unwrap(), "Hello, Happy World!");
/// ```
pub struct MemoCache {
    entries: DashMap<CallableId, Arc<FnEntries>>,
    policy: KeyPolicy,
    deep_copy_isolation: bool,
    #[cfg(feature = "stats")]
    stats: CacheStats,
}

impl Default for MemoCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolution of one locked look at a slot.
enum Lookup<R> {
    Hit(R),
    Wait(Arc<Flight>),
    Compute(Arc<Flight>),
}

impl MemoCache {
    /// Creates a cache with default options: hash fallback permitted,
    /// deep-copy isolation enabled.
    pub fn new() -> Self {
        MemoCacheBuilder::default().build()
    }

    pub fn builder() -> MemoCacheBuilder {
        MemoCacheBuilder::default()
    }

    /// The normalization policy wrapped callables should use, reflecting
    /// this cache's `allow_hash_fallback` setting.
    pub fn key_policy(&self) -> &KeyPolicy {
        &self.policy
    }

    /// Returns the stored result for `(id, key)`, computing and storing
    /// it first on a miss.
    ///
    /// The at-most-one-computation guarantee holds per `(id, key)`: when
    /// several threads miss concurrently, exactly one runs `compute`; the
    /// others block until it finishes and then observe the stored value.
    /// `compute` runs with no cache lock held.
    ///
    /// With deep-copy isolation enabled every caller, computing thread
    /// included, receives an independent copy of the stored value.
    pub fn fetch_or_compute<R, F>(&self, id: CallableId, key: CallKey, compute: F) -> R
    where
        R: CacheValue,
        F: FnOnce() -> R,
    {
        match self.try_fetch_or_compute(id, key, || Ok::<R, Infallible>(compute())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Fallible form of [`fetch_or_compute`](Self::fetch_or_compute).
    ///
    /// An `Err` from `compute` propagates to the caller and stores
    /// nothing: the next call with the same key retries. Callers that
    /// were blocked on the failed computation wake and retry with their
    /// own `compute` closure, so a transient failure is not replayed to
    /// threads that never observed it.
    pub fn try_fetch_or_compute<R, E, F>(
        &self,
        id: CallableId,
        key: CallKey,
        compute: F,
    ) -> Result<R, E>
    where
        R: CacheValue,
        F: FnOnce() -> Result<R, E>,
    {
        let fn_entries = Arc::clone(
            self.entries
                .entry(id)
                .or_insert_with(|| Arc::new(FnEntries::default()))
                .value(),
        );

        loop {
            let resolution = {
                let mut slots = fn_entries.slots.lock();
                let found = match slots.get(&key) {
                    Some(Slot::Ready(stored)) => {
                        // An entry of a different result type under the
                        // same identity and key means the id was reused
                        // across callables; recompute and replace rather
                        // than hand back the wrong type.
                        stored.as_any().downcast_ref::<R>().map(|value| {
                            #[cfg(feature = "stats")]
                            self.stats.record_hit();
                            Lookup::Hit(self.hand_out(value))
                        })
                    }
                    Some(Slot::InFlight(flight)) => Some(Lookup::Wait(Arc::clone(flight))),
                    None => None,
                };
                match found {
                    Some(resolution) => resolution,
                    None => {
                        let flight = Arc::new(Flight::new());
                        slots.insert(key.clone(), Slot::InFlight(Arc::clone(&flight)));
                        Lookup::Compute(flight)
                    }
                }
            };

            match resolution {
                Lookup::Hit(value) => return Ok(value),
                Lookup::Wait(flight) => {
                    trace!(?id, "waiting on in-flight computation");
                    flight.wait();
                    // Loop: either the slot is now Ready (hit) or the
                    // computation failed and the slot is gone (we take
                    // over and compute ourselves).
                }
                Lookup::Compute(flight) => {
                    #[cfg(feature = "stats")]
                    self.stats.record_miss();
                    trace!(?id, "cache miss, computing");
                    return self.run_compute(&fn_entries, &key, &flight, compute);
                }
            }
        }
    }

    /// Runs the user computation with no lock held, then publishes the
    /// outcome. The guard keeps waiters from deadlocking if `compute`
    /// panics: the flight marker is removed and everyone wakes.
    fn run_compute<R, E, F>(
        &self,
        fn_entries: &FnEntries,
        key: &CallKey,
        flight: &Flight,
        compute: F,
    ) -> Result<R, E>
    where
        R: CacheValue,
        F: FnOnce() -> Result<R, E>,
    {
        struct FlightGuard<'a> {
            fn_entries: &'a FnEntries,
            key: &'a CallKey,
            flight: &'a Flight,
            armed: bool,
        }

        impl Drop for FlightGuard<'_> {
            fn drop(&mut self) {
                if self.armed {
                    self.fn_entries.slots.lock().remove(self.key);
                    self.flight.finish();
                }
            }
        }

        let mut guard = FlightGuard {
            fn_entries,
            key,
            flight,
            armed: true,
        };

        match compute() {
            Ok(value) => {
                let handed_out = self.hand_out(&value);
                fn_entries
                    .slots
                    .lock()
                    .insert(key.clone(), Slot::Ready(Box::new(value)));
                flight.finish();
                guard.armed = false;
                Ok(handed_out)
            }
            // Guard drop removes the marker and wakes waiters; nothing
            // is stored and the error goes to this caller alone.
            Err(err) => Err(err),
        }
    }

    fn hand_out<R: CacheValue>(&self, value: &R) -> R {
        if self.deep_copy_isolation {
            value.isolate()
        } else {
            value.clone()
        }
    }

    /// Removes the entry stored under `(id, key)`.
    ///
    /// Returns `true` if an entry was removed; clearing an absent entry
    /// is a silent no-op (idempotent invalidation). An in-flight
    /// computation is not disturbed: it began before the clear and will
    /// still publish its result to the callers already waiting on it.
    pub fn clear_key(&self, id: CallableId, key: &CallKey) -> bool {
        let Some(fn_entries) = self.entries.get(&id).map(|e| Arc::clone(e.value())) else {
            return false;
        };
        let removed = {
            let mut slots = fn_entries.slots.lock();
            match slots.get(key) {
                Some(Slot::Ready(_)) => {
                    slots.remove(key);
                    true
                }
                _ => false,
            }
        };
        if removed {
            trace!(?id, "cleared one entry");
            // Prune the identity once its last entry is gone.
            self.entries
                .remove_if(&id, |_, entries| entries.slots.lock().is_empty());
        }
        removed
    }

    /// Clears the entry a previous call to the *original* callable `f`
    /// with `args` would have produced. See
    /// [`clear_key`](Self::clear_key) for semantics.
    ///
    /// # Errors
    ///
    /// [`KeyError::Unhashable`] if `args` cannot be normalized under this
    /// cache's policy; the call itself
    /// would have failed, so such an entry cannot exist.
    pub fn clear_call<F, A>(&self, _f: &F, args: A) -> Result<bool, KeyError>
    where
        F: Callable<A> + 'static,
        A: CallArgs,
    {
        let key = args.normalize(&self.policy)?;
        Ok(self.clear_key(CallableId::of::<F>(), &key))
    }

    /// Bound-method form of [`clear_call`](Self::clear_call): clears the
    /// entry for `method` invoked on this specific `receiver` with
    /// `args`. Other receivers' entries are untouched.
    pub fn clear_method<M, T, A>(
        &self,
        _method: &M,
        receiver: &T,
        args: A,
    ) -> Result<bool, KeyError>
    where
        M: Method<T, A> + 'static,
        T: ?Sized,
        A: CallArgs,
    {
        let key = args.normalize(&self.policy)?;
        Ok(self.clear_key(CallableId::bound::<M, T>(receiver), &key))
    }

    /// Drops every entry stored under one identity. Returns the number
    /// of completed entries removed.
    pub fn clear_callable(&self, id: CallableId) -> usize {
        match self.entries.remove(&id) {
            Some((_, fn_entries)) => {
                let count = fn_entries.ready_count();
                debug!(?id, count, "cleared callable");
                count
            }
            None => 0,
        }
    }

    /// Atomically discards every entry for every callable.
    ///
    /// Idempotent; clearing an empty cache is not an error. Computations
    /// in flight at the moment of the clear still complete and resolve
    /// their already-blocked waiters, but their results are unreachable
    /// afterwards: fresh calls recompute.
    pub fn clear_all(&self) {
        self.entries.clear();
        debug!("cleared all entries");
    }

    /// Number of completed entries across all identities. In-flight
    /// computations are not counted.
    pub fn entry_count(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.value().ready_count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Hit/miss counters for this cache instance.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Wraps a callable; invocations through the returned
    /// [`Memoized`] route through [`fetch_or_compute`](Self::fetch_or_compute).
    ///
    /// The identity is derived from `F`'s type, so wrapping the same
    /// function item or closure value twice targets the same entries.
    pub fn wrap<F, A>(&self, f: F) -> Memoized<'_, F, A>
    where
        F: Callable<A> + 'static,
    {
        Memoized::new(self, CallableId::of::<F>(), f)
    }

    /// Wraps `method` bound to `receiver`: the receiver's address
    /// participates in the identity, so the same method wrapped for two
    /// receiver instances caches independently.
    ///
    /// The cache does not hold or keep the receiver alive; see
    /// [`CallableId`] for the lifetime caveat.
    pub fn wrap_method<'c, 'r, M, T, A>(
        &'c self,
        method: M,
        receiver: &'r T,
    ) -> BoundMemoized<'c, 'r, M, T, A>
    where
        M: Method<T, A> + 'static,
        T: ?Sized,
    {
        BoundMemoized::new(self, CallableId::bound::<M, T>(receiver), method, receiver)
    }
}
