//! Typed wrappers that give a callable a memoizing call surface.
//!
//! Rust has no way to hand back "the same callable, but cached" (`Fn`
//! impls are unstable), so wrapping produces a [`Memoized`] (or
//! [`BoundMemoized`]) value whose `call` method is the memoizing
//! invocation. Arguments travel as tuples: `greet.call(("Happy".into(),))`.

use std::marker::PhantomData;

use crate::cache::MemoCache;
use crate::error::{KeyError, MemoError};
use crate::identity::CallableId;
use crate::key::CallArgs;
use crate::value::CacheValue;

/// A callable of some arity, with arguments packed into a tuple.
///
/// Implemented for every `Fn` of arity 0 through 6. The tuple packing is
/// what lets [`Memoized`] normalize the arguments by reference before
/// moving them into the actual invocation.
pub trait Callable<Args> {
    type Output;

    fn invoke(&self, args: Args) -> Self::Output;
}

impl<Fun, Out> Callable<()> for Fun
where
    Fun: Fn() -> Out,
{
    type Output = Out;

    fn invoke(&self, _args: ()) -> Out {
        self()
    }
}

macro_rules! impl_callable {
    ($($ty:ident $arg:ident),+) => {
        impl<Fun, $($ty,)+ Out> Callable<($($ty,)+)> for Fun
        where
            Fun: Fn($($ty),+) -> Out,
        {
            type Output = Out;

            fn invoke(&self, ($($arg,)+): ($($ty,)+)) -> Out {
                self($($arg),+)
            }
        }
    };
}

impl_callable!(A a);
impl_callable!(A a, B b);
impl_callable!(A a, B b, C c);
impl_callable!(A a, B b, C c, D d);
impl_callable!(A a, B b, C c, D d, E e);
impl_callable!(A a, B b, C c, D d, E e, F f);

/// A method-like callable: a receiver reference plus an argument tuple.
///
/// Implemented for every `Fn(&T, ...)` of arity 0 through 4 (receiver
/// excluded). Method *items* (`Widget::render`) implement this directly,
/// which is the intended way to build a [`BoundMemoized`]: the fn item
/// type is `'static` even though the receiver borrow is not.
pub trait Method<Receiver: ?Sized, Args> {
    type Output;

    fn invoke(&self, receiver: &Receiver, args: Args) -> Self::Output;
}

impl<Fun, Recv: ?Sized, Out> Method<Recv, ()> for Fun
where
    Fun: Fn(&Recv) -> Out,
{
    type Output = Out;

    fn invoke(&self, receiver: &Recv, _args: ()) -> Out {
        self(receiver)
    }
}

macro_rules! impl_method {
    ($($ty:ident $arg:ident),+) => {
        impl<Fun, Recv: ?Sized, $($ty,)+ Out> Method<Recv, ($($ty,)+)> for Fun
        where
            Fun: Fn(&Recv, $($ty),+) -> Out,
        {
            type Output = Out;

            fn invoke(&self, receiver: &Recv, ($($arg,)+): ($($ty,)+)) -> Out {
                self(receiver, $($arg),+)
            }
        }
    };
}

impl_method!(A a);
impl_method!(A a, B b);
impl_method!(A a, B b, C c);
impl_method!(A a, B b, C c, D d);

/// A callable wrapped with a memoizing call surface.
///
/// Created by [`MemoCache::wrap`]. The wrapper borrows the cache; the
/// callable itself is owned. Identity is the callable's type, so
/// wrapping the same function item twice, even on different wrappers,
/// addresses the same entries, and [`MemoCache::clear_call`] with the
/// original function reaches them too.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use memocache::MemoCache;
///
/// static CALLS: AtomicUsize = AtomicUsize::new(0);
///
/// fn fib(n: u64) -> u64 {
///     CALLS.fetch_add(1, Ordering::SeqCst);
///     match n {
///         0 | 1 => n,
///         _ => fib(n - 1) + fib(n - 2),
///     }
/// }
///
/// let cache = MemoCache::new();
/// let fib = cache.wrap(fib);
///
/// let first = fib.call((20,)).unwrap();
/// let calls_after_first = CALLS.load(Ordering::SeqCst);
/// assert_eq!(fib.call((20,)).unwrap(), first);
/// assert_eq!(CALLS.load(Ordering::SeqCst), calls_after_first);
/// ```
pub struct Memoized<'c, F, A> {
    cache: &'c MemoCache,
    id: CallableId,
    f: F,
    _args: PhantomData<fn(A)>,
}

impl<'c, F, A> Memoized<'c, F, A> {
    pub(crate) fn new(cache: &'c MemoCache, id: CallableId, f: F) -> Self {
        Self {
            cache,
            id,
            f,
            _args: PhantomData,
        }
    }

    /// The identity this wrapper caches under, for use with the raw
    /// [`MemoCache`] operations.
    pub fn id(&self) -> CallableId {
        self.id
    }

    /// Drops every cached entry of this callable. Returns the number of
    /// entries removed.
    pub fn clear_all_entries(&self) -> usize {
        self.cache.clear_callable(self.id)
    }
}

impl<F, A> Memoized<'_, F, A>
where
    F: Callable<A>,
    A: CallArgs,
{
    /// Invokes the wrapped callable through the cache.
    ///
    /// # Errors
    ///
    /// [`KeyError::Unhashable`] when an argument cannot be normalized
    /// under the cache's policy; the callable is not invoked in that
    /// case.
    pub fn call(&self, args: A) -> Result<F::Output, KeyError>
    where
        F::Output: CacheValue,
    {
        let key = args.normalize(self.cache.key_policy())?;
        Ok(self
            .cache
            .fetch_or_compute(self.id, key, || self.f.invoke(args)))
    }

    /// Removes the cached entry for exactly this argument set. No-op
    /// (returning `Ok(false)`) when nothing is cached for it.
    pub fn clear(&self, args: A) -> Result<bool, KeyError> {
        let key = args.normalize(self.cache.key_policy())?;
        Ok(self.cache.clear_key(self.id, &key))
    }
}

impl<F, A, T, E> Memoized<'_, F, A>
where
    F: Callable<A, Output = Result<T, E>>,
    A: CallArgs,
    T: CacheValue,
{
    /// Invokes a fallible callable through the cache.
    ///
    /// Only `Ok` results are cached. An `Err` propagates as
    /// [`MemoError::Compute`], nothing is stored, and the next call with
    /// the same arguments retries.
    pub fn try_call(&self, args: A) -> Result<T, MemoError<E>> {
        let key = args
            .normalize(self.cache.key_policy())
            .map_err(MemoError::Key)?;
        self.cache
            .try_fetch_or_compute(self.id, key, || self.f.invoke(args))
            .map_err(MemoError::Compute)
    }
}

/// A method bound to one receiver instance, with a memoizing call
/// surface.
///
/// Created by [`MemoCache::wrap_method`]. The receiver's address is part
/// of the identity: the same method wrapped for two instances caches
/// independently, and clearing one leaves the other intact.
///
/// # Examples
///
/// ```
/// use memocache::MemoCache;
///
/// struct Greeter {
///     name: String,
/// }
///
/// impl Greeter {
///     fn greet(&self, adj: String) -> String {
///         format!("{} says: Hello, {adj} World!", self.name)
///     }
/// }
///
/// let cache = MemoCache::new();
/// let alice = Greeter { name: "alice".into() };
/// let bob = Greeter { name: "bob".into() };
///
/// let greet_alice = cache.wrap_method(Greeter::greet, &alice);
/// let greet_bob = cache.wrap_method(Greeter::greet, &bob);
///
/// assert_ne!(
///     greet_alice.call(("Happy".into(),)).unwrap(),
///     greet_bob.call(("Happy".into(),)).unwrap(),
/// );
/// ```
pub struct BoundMemoized<'c, 'r, M, T: ?Sized, A> {
    cache: &'c MemoCache,
    id: CallableId,
    method: M,
    receiver: &'r T,
    _args: PhantomData<fn(A)>,
}

impl<'c, 'r, M, T: ?Sized, A> BoundMemoized<'c, 'r, M, T, A> {
    pub(crate) fn new(cache: &'c MemoCache, id: CallableId, method: M, receiver: &'r T) -> Self {
        Self {
            cache,
            id,
            method,
            receiver,
            _args: PhantomData,
        }
    }

    pub fn id(&self) -> CallableId {
        self.id
    }

    pub fn clear_all_entries(&self) -> usize {
        self.cache.clear_callable(self.id)
    }
}

impl<M, T: ?Sized, A> BoundMemoized<'_, '_, M, T, A>
where
    M: Method<T, A>,
    A: CallArgs,
{
    /// Invokes the bound method through the cache. See
    /// [`Memoized::call`].
    pub fn call(&self, args: A) -> Result<M::Output, KeyError>
    where
        M::Output: CacheValue,
    {
        let key = args.normalize(self.cache.key_policy())?;
        Ok(self
            .cache
            .fetch_or_compute(self.id, key, || self.method.invoke(self.receiver, args)))
    }

    /// Removes the cached entry for this receiver and argument set.
    pub fn clear(&self, args: A) -> Result<bool, KeyError> {
        let key = args.normalize(self.cache.key_policy())?;
        Ok(self.cache.clear_key(self.id, &key))
    }
}

impl<M, T: ?Sized, A, Out, E> BoundMemoized<'_, '_, M, T, A>
where
    M: Method<T, A, Output = Result<Out, E>>,
    A: CallArgs,
    Out: CacheValue,
{
    /// Fallible form of [`call`](Self::call); see [`Memoized::try_call`].
    pub fn try_call(&self, args: A) -> Result<Out, MemoError<E>> {
        let key = args
            .normalize(self.cache.key_policy())
            .map_err(MemoError::Key)?;
        self.cache
            .try_fetch_or_compute(self.id, key, || self.method.invoke(self.receiver, args))
            .map_err(MemoError::Compute)
    }
}
