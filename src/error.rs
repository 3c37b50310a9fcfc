use std::convert::Infallible;
use thiserror::Error;

/// Errors raised while normalizing call arguments into a cache key.
///
/// Key normalization happens before any computation is attempted, so a
/// `KeyError` always means the wrapped callable was never invoked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// A value could not be turned into a hashable key fragment and the
    /// identity fallback is disabled (see
    /// [`KeyPolicy::allow_hash_fallback`](crate::KeyPolicy)).
    #[error("value of type `{type_name}` cannot be normalized into a cache key (hash fallback disabled)")]
    Unhashable {
        /// The `std::any::type_name` of the offending value.
        type_name: &'static str,
    },
}

/// Combined error type for memoized calls that can themselves fail.
///
/// Returned by [`Memoized::try_call`](crate::Memoized::try_call) and
/// [`BoundMemoized::try_call`](crate::BoundMemoized::try_call): either the
/// arguments could not be normalized (`Key`), or the wrapped computation
/// returned an error (`Compute`). Computation errors are propagated
/// unchanged and are never stored in the cache.
#[derive(Debug, Error)]
pub enum MemoError<E = Infallible> {
    /// Argument normalization failed; the computation never ran.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// The wrapped callable returned an error. Not cached; a subsequent
    /// call with the same arguments retries the computation.
    #[error("{0}")]
    Compute(E),
}
