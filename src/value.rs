//! Cacheable result values and the deep-copy isolation seam.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// A value that can be stored in a [`MemoCache`](crate::MemoCache).
///
/// The cache keeps one canonical instance per entry and hands out copies.
/// Which copy it hands out depends on the cache's isolation setting:
///
/// * **Deep-copy isolation on** (the default): [`CacheValue::isolate`] is
///   called for every hand-out. The result must be structurally
///   independent of the stored value: mutating it must never affect the
///   cache or any other caller.
/// * **Isolation off**: plain [`Clone`] is used. For `Arc`-style types
///   that is a shallow copy sharing interior state with the cache; cheap,
///   but caller mutation through that shared state is then the caller's
///   hazard to manage.
///
/// For most types `Clone` already *is* a structural copy, which is what
/// the default `isolate` does. Override it only for types whose `Clone`
/// shares state; see the `SharedCell` types in this module for the pattern.
///
/// # Examples
///
/// A plain data type needs only the marker impl:
///
/// ```
/// use memocache::CacheValue;
///
/// #[derive(Clone)]
/// struct Report {
///     lines: Vec<String>,
/// }
///
/// impl CacheValue for Report {}
/// ```
pub trait CacheValue: Clone + Send + Sync + 'static {
    /// Returns a copy that shares no mutable state with `self`.
    fn isolate(&self) -> Self {
        self.clone()
    }
}

macro_rules! impl_cache_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl CacheValue for $ty {}
        )+
    };
}

impl_cache_value!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
    Duration,
);

impl<T: CacheValue> CacheValue for Option<T> {
    fn isolate(&self) -> Self {
        self.as_ref().map(CacheValue::isolate)
    }
}

impl<T: CacheValue, E: CacheValue> CacheValue for Result<T, E> {
    fn isolate(&self) -> Self {
        match self {
            Ok(value) => Ok(value.isolate()),
            Err(err) => Err(err.isolate()),
        }
    }
}

impl<T: CacheValue> CacheValue for Vec<T> {
    fn isolate(&self) -> Self {
        self.iter().map(CacheValue::isolate).collect()
    }
}

impl<T: CacheValue> CacheValue for VecDeque<T> {
    fn isolate(&self) -> Self {
        self.iter().map(CacheValue::isolate).collect()
    }
}

impl<T: CacheValue> CacheValue for Box<T> {
    fn isolate(&self) -> Self {
        Box::new((**self).isolate())
    }
}

impl<T: CacheValue + Ord> CacheValue for BTreeSet<T> {
    fn isolate(&self) -> Self {
        self.iter().map(CacheValue::isolate).collect()
    }
}

impl<T, S> CacheValue for HashSet<T, S>
where
    T: CacheValue + Eq + Hash,
    S: BuildHasher + Clone + Default + Send + Sync + 'static,
{
    fn isolate(&self) -> Self {
        self.iter().map(CacheValue::isolate).collect()
    }
}

impl<K: CacheValue + Ord, V: CacheValue> CacheValue for BTreeMap<K, V> {
    fn isolate(&self) -> Self {
        self.iter()
            .map(|(k, v)| (k.isolate(), v.isolate()))
            .collect()
    }
}

impl<K, V, S> CacheValue for HashMap<K, V, S>
where
    K: CacheValue + Eq + Hash,
    V: CacheValue,
    S: BuildHasher + Clone + Default + Send + Sync + 'static,
{
    fn isolate(&self) -> Self {
        self.iter()
            .map(|(k, v)| (k.isolate(), v.isolate()))
            .collect()
    }
}

macro_rules! impl_tuple_cache_value {
    ($($ty:ident . $idx:tt),+) => {
        impl<$($ty: CacheValue),+> CacheValue for ($($ty,)+) {
            fn isolate(&self) -> Self {
                ($(self.$idx.isolate(),)+)
            }
        }
    };
}

impl_tuple_cache_value!(A.0);
impl_tuple_cache_value!(A.0, B.1);
impl_tuple_cache_value!(A.0, B.1, C.2);
impl_tuple_cache_value!(A.0, B.1, C.2, D.3);

/// `Arc<T>`'s `Clone` is a shallow reference bump; isolation re-allocates
/// so the handed-out value shares nothing with the stored one.
impl<T: CacheValue> CacheValue for Arc<T> {
    fn isolate(&self) -> Self {
        Arc::new((**self).isolate())
    }
}

/// Shared interior-mutable state with a real deep copy.
///
/// `Clone` on a `SharedCell` is the usual shallow `Arc` bump: both
/// handles mutate the same value. [`CacheValue::isolate`] re-allocates,
/// so a cache hand-out never aliases the stored value. This is the
/// sharpest demonstration of what the cache's isolation flag changes:
/// with isolation off, every caller of a memoized function returning a
/// `SharedCell` receives a handle to the *same* cell.
///
/// # Examples
///
/// ```
/// use memocache::{CacheValue, SharedCell};
///
/// let stored = SharedCell::new(vec![1u32]);
///
/// let shallow = stored.clone();
/// shallow.update(|v| v.push(2));
/// assert_eq!(stored.get(), vec![1, 2]);
///
/// let deep = stored.isolate();
/// deep.update(|v| v.push(3));
/// assert_eq!(stored.get(), vec![1, 2]);
/// ```
pub struct SharedCell<T>(Arc<Mutex<T>>);

impl<T> SharedCell<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    /// Runs `f` with exclusive access to the contained value.
    pub fn update<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.0.lock())
    }

    /// True when `self` and `other` are handles to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> SharedCell<T> {
    /// Copies the contained value out.
    pub fn get(&self) -> T {
        self.0.lock().clone()
    }
}

impl<T> Clone for SharedCell<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: CacheValue> CacheValue for SharedCell<T> {
    fn isolate(&self) -> Self {
        Self::new(self.0.lock().isolate())
    }
}

/// Read-mostly variant of [`SharedCell`] backed by a `RwLock`.
pub struct SharedState<T>(Arc<RwLock<T>>);

impl<T> SharedState<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn read<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.0.read())
    }

    pub fn write<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.0.write())
    }
}

impl<T> Clone for SharedState<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: CacheValue> CacheValue for SharedState<T> {
    fn isolate(&self) -> Self {
        Self::new(self.0.read().isolate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_arc_is_a_fresh_allocation() {
        let stored = Arc::new(vec![1u32, 2, 3]);
        let copy = stored.isolate();
        assert_eq!(*stored, *copy);
        assert!(!Arc::ptr_eq(&stored, &copy));
    }

    #[test]
    fn isolated_cell_contents_diverge_after_mutation() {
        let stored = SharedCell::new(vec![1u32]);
        let copy = stored.isolate();
        assert!(!stored.ptr_eq(&copy));
        copy.update(|v| v.push(2));
        assert_eq!(stored.get(), vec![1]);
    }

    #[test]
    fn plain_clone_of_cell_shares_state() {
        let stored = SharedCell::new(vec![1u32]);
        let shared = stored.clone();
        shared.update(|v| v.push(2));
        assert_eq!(stored.get(), vec![1, 2]);
    }

    #[test]
    fn shared_state_isolation_matches_cell_semantics() {
        let stored = SharedState::new(String::from("a"));
        let copy = stored.isolate();
        copy.write(|s| s.push('b'));
        assert_eq!(stored.read(|s| s.clone()), "a");
    }
}
