use std::any::TypeId;

/// A stable, copyable identifier for a specific callable.
///
/// Two invocations of the same function item or the same closure value
/// yield equal identities; a closure bound to a different receiver
/// instance (via [`CallableId::bound`]) yields a distinct identity even
/// when the closure type is shared.
///
/// # Identity sources
///
/// * [`CallableId::of`] uses the `TypeId` of the callable's type. Every
///   function item and every closure has a unique type, so this is
///   collision-free for them. Plain function *pointers* (`fn(u32) -> u64`)
///   of the same signature share one type and therefore one identity;
///   wrap the function item directly, or use [`CallableId::bound`] with a
///   discriminating receiver, when that matters.
/// * [`CallableId::bound`] combines the `TypeId` with the receiver's
///   memory address, distinguishing "this method on *this* instance" from
///   the same method on any other instance.
///
/// # Ownership
///
/// The cache never holds the callable or the receiver; an identity is just
/// a `TypeId` plus an optional address. Entries keyed by a receiver that
/// has since been dropped stay in the cache until cleared, and a new
/// receiver allocated at the recycled address would alias them. Clear a
/// receiver's entries before dropping it if that can occur.
///
/// # Examples
///
/// ```
/// use memocache::CallableId;
///
/// fn double(x: u32) -> u32 {
///     x * 2
/// }
///
/// let a = CallableId::of::<fn(u32) -> u32>();
/// let b = CallableId::of::<fn(u32) -> u32>();
/// assert_eq!(a, b);
///
/// let recv1 = String::from("one");
/// let recv2 = String::from("two");
/// let bound1 = CallableId::bound::<fn(u32) -> u32, _>(&recv1);
/// let bound2 = CallableId::bound::<fn(u32) -> u32, _>(&recv2);
/// assert_ne!(bound1, bound2);
/// # let _ = double(1);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallableId {
    callee: TypeId,
    receiver: Option<usize>,
}

impl CallableId {
    /// Identity of a free function or unbound closure, derived from its
    /// type alone.
    pub fn of<F: ?Sized + 'static>() -> Self {
        Self {
            callee: TypeId::of::<F>(),
            receiver: None,
        }
    }

    /// Identity of a callable bound to a specific receiver instance.
    ///
    /// The receiver contributes only its address; it is not borrowed
    /// beyond this call and not kept alive by the cache.
    pub fn bound<F: ?Sized + 'static, T: ?Sized>(receiver: &T) -> Self {
        Self {
            callee: TypeId::of::<F>(),
            receiver: Some((receiver as *const T).cast::<()>() as usize),
        }
    }
}
