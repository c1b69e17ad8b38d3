use std::{
    alloc::{alloc, dealloc, handle_alloc_error, Layout},
    ptr::{self, NonNull},
};

use scopeguard::ScopeGuard;

use crate::counter::RefCount;

/// The type-erased part of a control block, shared by every layout.
///
/// It is always the first field of a `#[repr(C)]` block, so a pointer to the
/// block is also a pointer to its header.
#[repr(C)]
pub(crate) struct Header {
    strong: RefCount,
    /// Drops the payload and frees the block `Header` belongs to.
    destroy: unsafe fn(NonNull<Header>),
}

impl Header {
    #[inline(always)]
    fn new(destroy: unsafe fn(NonNull<Header>)) -> Self {
        Self {
            strong: RefCount::new(0),
            destroy,
        }
    }
}

/// The payload lives in the same allocation as its counter.
#[repr(C)]
struct Inline<T> {
    header: Header,
    value: T,
}

/// The payload was allocated by the caller and handed over as a `Box`.
#[repr(C)]
struct Adopted<T> {
    header: Header,
    value: NonNull<T>,
}

/// A payload pointer paired with the control block that owns it.
pub(crate) struct BlockRef<T> {
    value: NonNull<T>,
    header: NonNull<Header>,
}

impl<T> Clone for BlockRef<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BlockRef<T> {}

impl<T> BlockRef<T> {
    /// Allocates an inline block and runs `init` to fill in its payload.
    ///
    /// The block is freed again if `init` fails or panics. The counter of the
    /// returned block is zero.
    pub(crate) fn try_inline<E, F>(init: F) -> Result<Self, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let layout = Layout::new::<Inline<T>>();
        let raw = match NonNull::new(unsafe { alloc(layout) }.cast::<Inline<T>>()) {
            Some(raw) => raw,
            None => handle_alloc_error(layout),
        };
        let raw = scopeguard::guard(raw, |raw| unsafe {
            dealloc(raw.as_ptr().cast(), layout);
        });

        unsafe {
            let value = ptr::addr_of_mut!((*raw.as_ptr()).value);
            value.write(init()?);
            ptr::addr_of_mut!((*raw.as_ptr()).header).write(Header::new(destroy_inline::<T>));
        }
        let raw = ScopeGuard::into_inner(raw);

        Ok(Self {
            value: unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*raw.as_ptr()).value)) },
            header: raw.cast(),
        })
    }

    /// Allocates a control block next to an existing heap payload. The
    /// counter of the returned block is zero.
    pub(crate) fn adopt(value: Box<T>) -> Self {
        let value = NonNull::from(Box::leak(value));
        let block = Box::new(Adopted {
            header: Header::new(destroy_adopted::<T>),
            value,
        });
        Self {
            value,
            header: NonNull::from(Box::leak(block)).cast(),
        }
    }

    #[inline(always)]
    pub(crate) fn value(&self) -> NonNull<T> {
        self.value
    }

    #[inline(always)]
    pub(crate) fn same_block(&self, other: &Self) -> bool {
        self.header == other.header
    }

    #[inline(always)]
    pub(crate) fn strong(&self) -> &RefCount {
        // Safety: a `BlockRef` is only held while its block is alive.
        unsafe { &self.header.as_ref().strong }
    }

    /// Gives up one reference, destroying the payload and the block if it
    /// was the last one.
    ///
    /// # Safety
    /// The caller must own one of the references counted by this block and
    /// must not use `self` afterwards.
    #[inline(always)]
    pub(crate) unsafe fn release(self) {
        if self.strong().release() == 1 {
            let destroy = self.header.as_ref().destroy;
            destroy(self.header);
        }
    }
}

unsafe fn destroy_inline<T>(header: NonNull<Header>) {
    let raw = header.cast::<Inline<T>>();
    scopeguard::defer! {
        dealloc(raw.as_ptr().cast(), Layout::new::<Inline<T>>());
    }
    ptr::drop_in_place(ptr::addr_of_mut!((*raw.as_ptr()).value));
}

unsafe fn destroy_adopted<T>(header: NonNull<Header>) {
    let block = Box::from_raw(header.cast::<Adopted<T>>().as_ptr());
    drop(Box::from_raw(block.value.as_ptr()));
}
