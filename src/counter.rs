use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts above this value can only come from leaked handles.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// The strong reference count of one payload.
///
/// Assumption: the counter never goes negative. That is, every `release` is
/// paired with an earlier `acquire` (or with the initial value).
pub struct RefCount {
    strong: AtomicUsize,
}

impl RefCount {
    #[inline(always)]
    pub const fn new(init: usize) -> Self {
        Self {
            strong: AtomicUsize::new(init),
        }
    }

    /// Increments the counter.
    ///
    /// The caller already holds a live reference through a synchronized path,
    /// so a relaxed increment is enough.
    #[inline(always)]
    pub fn acquire(&self) {
        let old = self.strong.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    /// Decrements the counter and returns the previous value.
    ///
    /// A returned `1` means this call dropped the last reference. The
    /// acquire half of the ordering makes every write published by earlier
    /// releases visible to that caller before it destroys the payload.
    #[inline(always)]
    pub fn release(&self) -> usize {
        let old = self.strong.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "reference count released below zero");
        old
    }

    #[inline(always)]
    pub fn load(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for RefCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RefCount").field(&self.load()).finish()
    }
}
