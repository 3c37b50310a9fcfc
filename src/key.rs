//! Argument-to-key normalization.
//!
//! Every memoized invocation is reduced to a [`CallKey`]: an immutable,
//! hashable tree of [`KeyFragment`]s derived depth-first from the call's
//! positional and named arguments. Classification of a value as
//! sequence-like, mapping-like or opaque is decided by which
//! [`ToKeyFragment`] impl applies to its type, the static-typing
//! equivalent of configuring runtime type sets.
//!
//! # Ordering policy
//!
//! Mappings normalize to their pairs **in natural iteration order**. Two
//! mappings holding the same pairs but iterating differently (e.g. two
//! `HashMap`s with different internal layouts, or named-argument lists
//! given in a different order) normalize to *different* keys. This is a
//! deliberate policy, not an oversight: collapsing order would require
//! sorting arbitrary fragments on every call. The same caveat applies to
//! `HashSet`, whose iteration order is unspecified and leaks into the key.
//! Use `BTreeMap`/`BTreeSet` arguments when order-insensitive keys matter.

use std::any::type_name;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::BuildHasher;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::KeyError;

/// Normalization policy options.
///
/// Currently a single knob: whether values without a structural key
/// representation may fall back to a non-structural substitute
/// (float bit patterns, [`ByAddress`] identities).
#[derive(Clone, Copy, Debug)]
pub struct KeyPolicy {
    /// Permit fallback fragments for values with no total equality
    /// (floats) or no structural key at all ([`ByAddress`]). When `false`,
    /// normalizing such a value fails with [`KeyError::Unhashable`].
    /// Defaults to `true`.
    pub allow_hash_fallback: bool,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            allow_hash_fallback: true,
        }
    }
}

/// One node of a normalized key tree.
///
/// Fragments are compared within a single callable's key space (entries
/// are already partitioned by [`CallableId`](crate::CallableId)), so
/// variants only need to be distinct enough to keep *that* space
/// collision-free. All variants are `Eq + Hash` by construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyFragment {
    /// The unit value.
    Unit,
    Bool(bool),
    /// Any signed integer, widened to `i64`.
    Int(i64),
    /// Any unsigned integer, widened to `u64`.
    UInt(u64),
    Char(char),
    Str(String),
    /// A float admitted through the hash fallback, keyed by bit pattern.
    /// `NaN` therefore equals itself and `0.0` differs from `-0.0`.
    FloatBits(u64),
    /// Sequence-like value: elements in iteration order.
    Seq(Vec<KeyFragment>),
    /// Mapping-like value: pairs in natural iteration order.
    Map(Vec<(KeyFragment, KeyFragment)>),
    /// Identity substitute for a value with no structural key: its
    /// memory address at normalization time. See [`ByAddress`].
    Identity(usize),
}

/// Conversion of an argument value into a [`KeyFragment`].
///
/// Implementations fall into the three classes the normalizer
/// distinguishes:
///
/// * **Opaque**: scalars, strings, and anything with a direct stable
///   representation. Produce a leaf fragment.
/// * **Sequence**: slices, `Vec`, `VecDeque`, arrays, tuples, sets.
///   Recurse over elements in iteration order into [`KeyFragment::Seq`].
/// * **Mapping**: `HashMap`, `BTreeMap`. Recurse over pairs in iteration
///   order into [`KeyFragment::Map`].
///
/// The trait is object-safe; [`CallKey::normalize`] accepts
/// `&dyn ToKeyFragment` slices so heterogeneous argument lists can be
/// normalized without a common concrete type.
///
/// # Examples
///
/// Custom types implement the trait by delegating to their fields:
///
/// ```
/// use memocache::{KeyError, KeyFragment, KeyPolicy, ToKeyFragment};
///
/// struct UserRef {
///     id: u64,
/// }
///
/// impl ToKeyFragment for UserRef {
///     fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
///         self.id.key_fragment(policy)
///     }
/// }
/// ```
pub trait ToKeyFragment {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError>;
}

macro_rules! impl_int_fragments {
    ($variant:ident as $wide:ty => $($ty:ty),+) => {
        $(
            impl ToKeyFragment for $ty {
                fn key_fragment(&self, _policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
                    Ok(KeyFragment::$variant(*self as $wide))
                }
            }
        )+
    };
}

impl_int_fragments!(Int as i64 => i8, i16, i32, i64, isize);
impl_int_fragments!(UInt as u64 => u8, u16, u32, u64, usize);

impl ToKeyFragment for () {
    fn key_fragment(&self, _policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        Ok(KeyFragment::Unit)
    }
}

impl ToKeyFragment for bool {
    fn key_fragment(&self, _policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        Ok(KeyFragment::Bool(*self))
    }
}

impl ToKeyFragment for char {
    fn key_fragment(&self, _policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        Ok(KeyFragment::Char(*self))
    }
}

impl ToKeyFragment for str {
    fn key_fragment(&self, _policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        Ok(KeyFragment::Str(self.to_owned()))
    }
}

impl ToKeyFragment for String {
    fn key_fragment(&self, _policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        Ok(KeyFragment::Str(self.clone()))
    }
}

macro_rules! impl_float_fragments {
    ($($ty:ty),+) => {
        $(
            impl ToKeyFragment for $ty {
                fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
                    if policy.allow_hash_fallback {
                        Ok(KeyFragment::FloatBits(self.to_bits() as u64))
                    } else {
                        Err(KeyError::Unhashable {
                            type_name: type_name::<$ty>(),
                        })
                    }
                }
            }
        )+
    };
}

impl_float_fragments!(f32, f64);

impl<T: ToKeyFragment + ?Sized> ToKeyFragment for &T {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        (**self).key_fragment(policy)
    }
}

impl<T: ToKeyFragment + ?Sized> ToKeyFragment for Box<T> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        (**self).key_fragment(policy)
    }
}

impl<T: ToKeyFragment + ?Sized> ToKeyFragment for Arc<T> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        (**self).key_fragment(policy)
    }
}

impl<T: ToKeyFragment + ?Sized> ToKeyFragment for Rc<T> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        (**self).key_fragment(policy)
    }
}

// `None` and an empty sequence produce the same fragment; within one typed
// argument position that cannot collide with anything else.
impl<T: ToKeyFragment> ToKeyFragment for Option<T> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        match self {
            Some(value) => Ok(KeyFragment::Seq(vec![value.key_fragment(policy)?])),
            None => Ok(KeyFragment::Seq(Vec::new())),
        }
    }
}

fn seq_fragment<'a, T, I>(items: I, policy: &KeyPolicy) -> Result<KeyFragment, KeyError>
where
    T: ToKeyFragment + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut fragments = Vec::new();
    for item in items {
        fragments.push(item.key_fragment(policy)?);
    }
    Ok(KeyFragment::Seq(fragments))
}

impl<T: ToKeyFragment> ToKeyFragment for [T] {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        seq_fragment(self, policy)
    }
}

impl<T: ToKeyFragment, const N: usize> ToKeyFragment for [T; N] {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        seq_fragment(self, policy)
    }
}

impl<T: ToKeyFragment> ToKeyFragment for Vec<T> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        seq_fragment(self, policy)
    }
}

impl<T: ToKeyFragment> ToKeyFragment for VecDeque<T> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        seq_fragment(self, policy)
    }
}

impl<T: ToKeyFragment> ToKeyFragment for BTreeSet<T> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        seq_fragment(self, policy)
    }
}

// Iteration order of a HashSet is unspecified and leaks into the key:
// two sets with equal elements may normalize differently. Documented
// limitation; prefer BTreeSet when that matters.
impl<T: ToKeyFragment, S: BuildHasher> ToKeyFragment for HashSet<T, S> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        seq_fragment(self, policy)
    }
}

fn map_fragment<'a, K, V, I>(pairs: I, policy: &KeyPolicy) -> Result<KeyFragment, KeyError>
where
    K: ToKeyFragment + 'a,
    V: ToKeyFragment + 'a,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    let mut fragments = Vec::new();
    for (key, value) in pairs {
        fragments.push((key.key_fragment(policy)?, value.key_fragment(policy)?));
    }
    Ok(KeyFragment::Map(fragments))
}

impl<K: ToKeyFragment, V: ToKeyFragment> ToKeyFragment for BTreeMap<K, V> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        map_fragment(self, policy)
    }
}

// Same iteration-order caveat as HashSet.
impl<K: ToKeyFragment, V: ToKeyFragment, S: BuildHasher> ToKeyFragment for HashMap<K, V, S> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        map_fragment(self, policy)
    }
}

macro_rules! impl_tuple_fragments {
    ($($ty:ident . $idx:tt),+) => {
        impl<$($ty: ToKeyFragment),+> ToKeyFragment for ($($ty,)+) {
            fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
                Ok(KeyFragment::Seq(vec![$(self.$idx.key_fragment(policy)?),+]))
            }
        }
    };
}

impl_tuple_fragments!(A.0);
impl_tuple_fragments!(A.0, B.1);
impl_tuple_fragments!(A.0, B.1, C.2);
impl_tuple_fragments!(A.0, B.1, C.2, D.3);
impl_tuple_fragments!(A.0, B.1, C.2, D.3, E.4);
impl_tuple_fragments!(A.0, B.1, C.2, D.3, E.4, F.5);

/// Keys a value by its memory address instead of its structure.
///
/// The escape hatch for argument types with no meaningful structural key:
/// the fragment is the referent's address at normalization time, so two
/// calls hit the same entry only when they pass *the same object*. The
/// address is only stable while the referent stays put; entries keyed
/// this way should be cleared before the referent is dropped.
///
/// Gated by [`KeyPolicy::allow_hash_fallback`]: with the fallback
/// disabled, normalizing a `ByAddress` fails with
/// [`KeyError::Unhashable`].
///
/// # Examples
///
/// ```
/// use memocache::{ByAddress, KeyPolicy, ToKeyFragment};
///
/// let policy = KeyPolicy::default();
/// let buffer = vec![0u8; 16];
///
/// let a = ByAddress(&buffer).key_fragment(&policy).unwrap();
/// let b = ByAddress(&buffer).key_fragment(&policy).unwrap();
/// assert_eq!(a, b);
/// ```
pub struct ByAddress<'a, T: ?Sized>(pub &'a T);

impl<T: ?Sized> ToKeyFragment for ByAddress<'_, T> {
    fn key_fragment(&self, policy: &KeyPolicy) -> Result<KeyFragment, KeyError> {
        if policy.allow_hash_fallback {
            Ok(KeyFragment::Identity(
                (self.0 as *const T).cast::<()>() as usize
            ))
        } else {
            Err(KeyError::Unhashable {
                type_name: type_name::<T>(),
            })
        }
    }
}

/// The normalized key of one invocation.
///
/// Always two top-level fragments, present even when empty: the
/// positional arguments as a [`KeyFragment::Seq`] and the named arguments
/// as a [`KeyFragment::Map`]. Named pairs keep the order the caller gave
/// them; see the module docs for why order is significant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallKey {
    positional: KeyFragment,
    named: KeyFragment,
}

impl CallKey {
    /// Normalizes one invocation's arguments into a key.
    ///
    /// # Arguments
    ///
    /// * `positional` - positional arguments, in call order
    /// * `named` - named arguments as `(name, value)` pairs, in the order
    ///   they should contribute to the key
    /// * `policy` - fallback policy, normally the owning cache's
    ///
    /// # Errors
    ///
    /// [`KeyError::Unhashable`] if any value cannot produce a fragment
    /// under `policy`.
    ///
    /// # Examples
    ///
    /// ```
    /// use memocache::{CallKey, KeyPolicy};
    ///
    /// let policy = KeyPolicy::default();
    /// let a = CallKey::normalize(&[&"Happy"], &[], &policy).unwrap();
    /// let b = CallKey::normalize(&[&"Happy"], &[], &policy).unwrap();
    /// let c = CallKey::normalize(&[&"Cautious"], &[], &policy).unwrap();
    /// assert_eq!(a, b);
    /// assert_ne!(a, c);
    /// ```
    pub fn normalize(
        positional: &[&dyn ToKeyFragment],
        named: &[(&str, &dyn ToKeyFragment)],
        policy: &KeyPolicy,
    ) -> Result<Self, KeyError> {
        let mut pos = Vec::with_capacity(positional.len());
        for value in positional {
            pos.push(value.key_fragment(policy)?);
        }
        let mut pairs = Vec::with_capacity(named.len());
        for (name, value) in named {
            pairs.push((
                KeyFragment::Str((*name).to_owned()),
                value.key_fragment(policy)?,
            ));
        }
        Ok(Self {
            positional: KeyFragment::Seq(pos),
            named: KeyFragment::Map(pairs),
        })
    }

    pub(crate) fn from_positional(positional: Vec<KeyFragment>) -> Self {
        Self {
            positional: KeyFragment::Seq(positional),
            named: KeyFragment::Map(Vec::new()),
        }
    }
}

/// Typed argument tuples that can normalize themselves into a [`CallKey`].
///
/// Implemented for `()` and tuples up to arity 6 whose elements all
/// implement [`ToKeyFragment`]. This is the bridge the
/// [`Memoized`](crate::Memoized) wrappers use: a call's argument tuple is
/// normalized by reference, then moved into the computation.
pub trait CallArgs {
    fn normalize(&self, policy: &KeyPolicy) -> Result<CallKey, KeyError>;
}

impl CallArgs for () {
    fn normalize(&self, _policy: &KeyPolicy) -> Result<CallKey, KeyError> {
        Ok(CallKey::from_positional(Vec::new()))
    }
}

macro_rules! impl_call_args {
    ($($ty:ident . $idx:tt),+) => {
        impl<$($ty: ToKeyFragment),+> CallArgs for ($($ty,)+) {
            fn normalize(&self, policy: &KeyPolicy) -> Result<CallKey, KeyError> {
                Ok(CallKey::from_positional(vec![
                    $(self.$idx.key_fragment(policy)?),+
                ]))
            }
        }
    };
}

impl_call_args!(A.0);
impl_call_args!(A.0, B.1);
impl_call_args!(A.0, B.1, C.2);
impl_call_args!(A.0, B.1, C.2, D.3);
impl_call_args!(A.0, B.1, C.2, D.3, E.4);
impl_call_args!(A.0, B.1, C.2, D.3, E.4, F.5);

#[cfg(test)]
mod tests {
    use super::*;

    fn frag<T: ToKeyFragment>(value: T) -> KeyFragment {
        value
            .key_fragment(&KeyPolicy::default())
            .expect("normalization should succeed under the default policy")
    }

    #[test]
    fn integers_widen_to_a_common_variant() {
        assert_eq!(frag(3i8), frag(3i64));
        assert_eq!(frag(7u16), frag(7u64));
        // Signed and unsigned stay distinct even for equal magnitudes.
        assert_ne!(frag(3i32), frag(3u32));
    }

    #[test]
    fn nested_collections_recurse_depth_first() {
        let nested = vec![vec![1u32, 2], vec![3]];
        assert_eq!(
            frag(nested),
            KeyFragment::Seq(vec![
                KeyFragment::Seq(vec![KeyFragment::UInt(1), KeyFragment::UInt(2)]),
                KeyFragment::Seq(vec![KeyFragment::UInt(3)]),
            ])
        );
    }

    #[test]
    fn btreemap_pairs_follow_iteration_order() {
        let mut map = BTreeMap::new();
        map.insert("b", 2u32);
        map.insert("a", 1u32);
        // BTreeMap iterates sorted, so insertion order is irrelevant here.
        assert_eq!(
            frag(map),
            KeyFragment::Map(vec![
                (KeyFragment::Str("a".into()), KeyFragment::UInt(1)),
                (KeyFragment::Str("b".into()), KeyFragment::UInt(2)),
            ])
        );
    }

    #[test]
    fn named_argument_order_is_significant() {
        let policy = KeyPolicy::default();
        let ab = CallKey::normalize(&[], &[("a", &1u32), ("b", &2u32)], &policy).unwrap();
        let ba = CallKey::normalize(&[], &[("b", &2u32), ("a", &1u32)], &policy).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn empty_argument_lists_still_produce_both_fragments() {
        let policy = KeyPolicy::default();
        let key = CallKey::normalize(&[], &[], &policy).unwrap();
        assert_eq!(key.positional, KeyFragment::Seq(Vec::new()));
        assert_eq!(key.named, KeyFragment::Map(Vec::new()));
    }

    #[test]
    fn floats_require_the_fallback() {
        let strict = KeyPolicy {
            allow_hash_fallback: false,
        };
        assert!(matches!(
            1.5f64.key_fragment(&strict),
            Err(KeyError::Unhashable { .. })
        ));
        // Bit-pattern keys: NaN equals itself, negative zero does not
        // equal positive zero.
        assert_eq!(frag(f64::NAN), frag(f64::NAN));
        assert_ne!(frag(0.0f64), frag(-0.0f64));
    }

    #[test]
    fn by_address_tracks_the_referent_not_the_contents() {
        let policy = KeyPolicy::default();
        let first = vec![1u8];
        let second = vec![1u8];
        let a = ByAddress(&first).key_fragment(&policy).unwrap();
        let b = ByAddress(&second).key_fragment(&policy).unwrap();
        assert_ne!(a, b);

        let strict = KeyPolicy {
            allow_hash_fallback: false,
        };
        assert!(ByAddress(&first).key_fragment(&strict).is_err());
    }

    #[test]
    fn tuple_args_match_explicit_normalization() {
        let policy = KeyPolicy::default();
        let via_tuple = ("Happy".to_string(),).normalize(&policy).unwrap();
        let via_slice = CallKey::normalize(&[&"Happy"], &[], &policy).unwrap();
        assert_eq!(via_tuple, via_slice);
    }
}
