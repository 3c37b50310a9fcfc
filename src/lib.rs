//! # memocache
//!
//! A thread-safe memoization cache for Rust: wrap a callable, and calls
//! with an equivalent argument set are served from the cache instead of
//! recomputing.
//!
//! ## Features
//!
//! - **Structural keys**: arguments normalize into a hashable key tree;
//!   sequences, mappings and scalars recurse depth-first, with an
//!   explicit, documented ordering policy
//! - **Shared instance, isolated entries**: any number of callables share
//!   one cache; entries are partitioned by callable identity, including
//!   per-receiver identities for bound methods
//! - **Single-flight computation**: concurrent misses on the same key run
//!   the computation exactly once; unrelated keys never serialize
//! - **Deep-copy isolation**: callers receive structurally independent
//!   copies of cached values, so mutating a returned value can never
//!   corrupt the cache (opt-out for cheap shallow hand-outs)
//! - **Fine-grained invalidation**: clear one argument set, one callable,
//!   or everything; clearing something absent is a silent no-op
//! - **Result-aware**: fallible callables cache only `Ok` results;
//!   errors propagate uncached and the next call retries
//! - **Statistics**: hit/miss counters behind the `stats` feature
//!
//! Deliberately out of scope: eviction policies, TTL expiration,
//! persistence, and cross-process coherence. Entries stay until cleared.
//!
//! ## Quick start
//!
//! ```
//! use memocache::MemoCache;
//!
//! let cache = MemoCache::new();
//! let greet = cache.wrap(|adj: String| format!("Hello, {adj} World!"));
//!
//! assert_eq!(greet.call(("Happy".into(),)).unwrap(), "Hello, Happy World!");
//! assert_eq!(greet.call(("Cautious".into(),)).unwrap(), "Hello, Cautious World!");
//!
//! // Invalidate one argument set; the other entry survives.
//! greet.clear(("Happy".into(),)).unwrap();
//! assert_eq!(cache.entry_count(), 1);
//!
//! cache.clear_all();
//! assert!(cache.is_empty());
//! ```
//!
//! ## Module organization
//!
//! - [`key`] - argument normalization: [`KeyFragment`], [`CallKey`],
//!   [`ToKeyFragment`], the ordering policy and its caveats
//! - [`identity`](CallableId) - callable identities, free and
//!   receiver-bound
//! - [`value`](CacheValue) - cacheable values and the deep-copy seam
//! - [`cache`](MemoCache) - the cache: fetch-or-compute, single-flight
//!   coordination, invalidation
//! - [`wrap`](Memoized) - typed call surfaces over wrapped callables

pub mod key;

mod cache;
mod error;
mod identity;
mod value;
mod wrap;

#[cfg(feature = "stats")]
mod stats;

pub use cache::{MemoCache, MemoCacheBuilder};
pub use error::{KeyError, MemoError};
pub use identity::CallableId;
pub use key::{ByAddress, CallArgs, CallKey, KeyFragment, KeyPolicy, ToKeyFragment};
pub use value::{CacheValue, SharedCell, SharedState};
pub use wrap::{BoundMemoized, Callable, Memoized, Method};

#[cfg(feature = "stats")]
pub use stats::CacheStats;
