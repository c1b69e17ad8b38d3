use std::{
    convert::Infallible,
    fmt,
    marker::PhantomData,
    mem,
    ptr::{self, NonNull},
};

use static_assertions::const_assert;

use crate::block::BlockRef;

/// A thread-safe reference counted pointer.
///
/// An `Rc` is either *null* or *bound* to a payload. All bound handles to a
/// payload share one control block, and the payload is destroyed exactly once,
/// by whichever handle drops the last reference. Cloning a handle only
/// increments the counter; it never allocates.
///
/// The payload is only reachable through shared references. Mutating it
/// concurrently needs synchronization inside `T`.
///
/// # Examples
///
/// ```
/// use refcounted_ptr::Rc;
///
/// let a = Rc::new(7);
/// let b = a.clone();
/// assert!(a.ptr_eq(&b));
/// assert_eq!(a.ref_count(), 2);
///
/// drop(a);
/// assert_eq!(b.as_ref(), Some(&7));
/// assert_eq!(b.ref_count(), 1);
/// ```
pub struct Rc<T> {
    block: Option<BlockRef<T>>,
    _marker: PhantomData<T>,
}

// A handle is a payload pointer and a control block pointer, nothing more.
const_assert!(mem::size_of::<Rc<u8>>() == 2 * mem::size_of::<usize>());
const_assert!(mem::size_of::<Rc<[u64; 16]>>() == 2 * mem::size_of::<usize>());

unsafe impl<T: Send + Sync> Send for Rc<T> {}
unsafe impl<T: Send + Sync> Sync for Rc<T> {}

impl<T> Rc<T> {
    /// Returns a null handle. No memory is allocated.
    #[inline(always)]
    pub const fn null() -> Self {
        Self {
            block: None,
            _marker: PhantomData,
        }
    }

    /// Allocates `value` together with a new control block.
    #[inline]
    pub fn new(value: T) -> Self {
        Self::new_with(|| value)
    }

    /// Allocates a control block and constructs the payload with `init`
    /// directly into it.
    #[inline]
    pub fn new_with<F>(init: F) -> Self
    where
        F: FnOnce() -> T,
    {
        match Self::try_new_with(|| Ok::<_, Infallible>(init())) {
            Ok(rc) => rc,
            Err(never) => match never {},
        }
    }

    /// Like [`Rc::new_with`], but the payload constructor may fail.
    ///
    /// On failure the error is returned unchanged and the allocation made for
    /// the payload is released. The same holds if `init` panics.
    ///
    /// # Examples
    ///
    /// ```
    /// use refcounted_ptr::Rc;
    ///
    /// let rc = Rc::try_new_with(|| "42".parse::<u32>()).unwrap();
    /// assert_eq!(rc.as_ref(), Some(&42));
    ///
    /// let err = Rc::try_new_with(|| "x".parse::<u32>());
    /// assert!(err.is_err());
    /// ```
    pub fn try_new_with<E, F>(init: F) -> Result<Self, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        BlockRef::try_inline(init).map(Self::bind)
    }

    /// Takes over a boxed payload. A control block is allocated beside it.
    #[inline]
    pub fn from_box(value: Box<T>) -> Self {
        Self::bind(BlockRef::adopt(value))
    }

    /// Takes over a raw payload pointer.
    ///
    /// A null `ptr` yields a null handle and allocates nothing.
    ///
    /// # Safety
    /// `ptr` must be null or come from [`Box::into_raw`], and the caller gives
    /// up ownership of it. Adopting the same pointer twice leads to a double
    /// free. Prefer [`Rc::new`] or [`Rc::from_box`].
    #[inline]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        match NonNull::new(ptr) {
            Some(ptr) => Self::from_box(Box::from_raw(ptr.as_ptr())),
            None => Self::null(),
        }
    }

    #[inline(always)]
    fn bind(block: BlockRef<T>) -> Self {
        block.strong().acquire();
        Self {
            block: Some(block),
            _marker: PhantomData,
        }
    }

    /// Rebinds `self` to the payload of `source`.
    ///
    /// The current binding is released first, destroying its payload if this
    /// was the last reference, and then the binding of `source` is acquired.
    /// If both handles share a payload the count drops and rises again but
    /// never reaches zero, since `source` holds its own reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use refcounted_ptr::Rc;
    ///
    /// let mut a = Rc::new(1);
    /// let b = Rc::new(2);
    /// a.assign(&b);
    /// assert!(a.ptr_eq(&b));
    /// assert_eq!(b.ref_count(), 2);
    /// ```
    pub fn assign(&mut self, source: &Self) {
        if let Some(old) = self.block.take() {
            unsafe { old.release() };
        }
        if let Some(block) = source.block {
            block.strong().acquire();
            self.block = Some(block);
        }
    }

    /// Returns a pointer to the payload, or null for a null handle.
    ///
    /// The pointer stays valid while `self` is bound to the payload.
    #[inline(always)]
    pub fn as_ptr(&self) -> *const T {
        match self.block {
            Some(block) => block.value().as_ptr(),
            None => ptr::null(),
        }
    }

    #[inline(always)]
    pub fn as_ref(&self) -> Option<&T> {
        // Safety: the payload outlives every handle bound to it.
        self.block.map(|block| unsafe { block.value().as_ref() })
    }

    #[inline(always)]
    pub fn is_null(&self) -> bool {
        self.block.is_none()
    }

    /// Returns the number of handles bound to the payload, or zero for a
    /// null handle.
    ///
    /// Other threads may change the count at any time. The value is exact
    /// only when no other thread holds a handle to the payload.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.block.map_or(0, |block| block.strong().load())
    }

    /// Returns true if both handles are bound to the same control block, or
    /// both are null.
    #[inline(always)]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.block, &other.block) {
            (Some(lhs), Some(rhs)) => lhs.same_block(rhs),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T> Clone for Rc<T> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            block.strong().acquire();
        }
        Self {
            block: self.block,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<T> Drop for Rc<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe { block.release() };
        }
    }
}

impl<T> Default for Rc<T> {
    #[inline(always)]
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<Box<T>> for Rc<T> {
    #[inline]
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T> PartialEq for Rc<T> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for Rc<T> {}

impl<T: fmt::Debug> fmt::Debug for Rc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ref() {
            Some(value) => f.debug_tuple("Rc").field(value).finish(),
            None => f.write_str("Rc(null)"),
        }
    }
}
