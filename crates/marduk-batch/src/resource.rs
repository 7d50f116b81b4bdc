//! Shared ownership for GPU-backed objects.
//!
//! A [`Shared`] handle is a counted reference to a value whose `Drop` is the
//! owning destructor. The destructor runs exactly once, synchronously, when
//! the last handle goes away. `release` consumes its handle, so releasing more
//! times than the object was referenced does not compile.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// Counted reference to a resource (texture, spritesheet, pool, ...).
///
/// Not thread-safe: all handles to one resource must stay on the frame thread.
pub struct Shared<T> {
    inner: Rc<T>,
}

impl<T> Shared<T> {
    /// Wraps `value`; the returned handle accounts for the first reference.
    #[inline]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(value),
        }
    }

    /// Takes an additional reference to the same object.
    #[inline]
    pub fn reference(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Drops this reference.
    ///
    /// Returns `true` when this was the last reference, in which case the
    /// value has been destroyed before this call returns.
    pub fn release(self) -> bool {
        match Rc::try_unwrap(self.inner) {
            Ok(value) => {
                drop(value);
                true
            }
            Err(_) => false,
        }
    }

    /// Number of live handles.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Whether both handles point at the same object.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        self.reference()
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("refs", &self.ref_count())
            .field("value", &*self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Probe<'a> {
        drops: &'a Cell<u32>,
    }

    impl Drop for Probe<'_> {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn destructor_runs_once_on_last_release() {
        let drops = Cell::new(0);
        let a = Shared::new(Probe { drops: &drops });
        let b = a.reference();
        let c = a.reference();
        assert_eq!(a.ref_count(), 3);

        assert!(!a.release());
        assert_eq!(drops.get(), 0);
        assert!(!b.release());
        assert_eq!(drops.get(), 0);
        assert!(c.release());
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn reference_points_at_same_object() {
        let drops = Cell::new(0);
        let a = Shared::new(Probe { drops: &drops });
        let b = a.reference();
        assert!(Shared::ptr_eq(&a, &b));
        assert_eq!(b.ref_count(), 2);
    }

    #[test]
    fn dropping_handles_counts_as_release() {
        let drops = Cell::new(0);
        {
            let a = Shared::new(Probe { drops: &drops });
            let _b = a.clone();
        }
        assert_eq!(drops.get(), 1);
    }
}
