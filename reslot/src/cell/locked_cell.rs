use crate::sync::NestingLock;
use core::cell::{BorrowError, Ref, RefCell, RefMut, UnsafeCell};
use core::marker::PhantomData;

/// A `Cell` whose value can only be read or written while holding lock `L`.
///
/// The key token of the lock proves that the caller is inside the lock section,
/// which makes the cell shareable between threads of execution.
#[repr(transparent)]
pub struct LockedCell<T: ?Sized, L: NestingLock> {
    _phantom: PhantomData<L>,
    value: UnsafeCell<T>,
}

unsafe impl<T: ?Sized, L: NestingLock> Send for LockedCell<T, L>
where
    T: Send,
    L: Send,
{
}

unsafe impl<T: ?Sized, L: NestingLock> Sync for LockedCell<T, L> where L: Sync {}

impl<T, L: NestingLock> LockedCell<T, L> {
    #[inline]
    pub const fn new(value: T) -> LockedCell<T, L> {
        LockedCell {
            _phantom: PhantomData,
            value: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub fn get(&self, _key: L::Key<'_>) -> T
    where
        T: Copy,
    {
        unsafe { *self.value.get() }
    }

    #[inline]
    pub fn set(&self, key: L::Key<'_>, value: T) {
        drop(self.replace(key, value));
    }

    #[inline]
    pub fn replace(&self, _key: L::Key<'_>, value: T) -> T {
        let inner = unsafe { &mut *self.value.get() };
        core::mem::replace(inner, value)
    }
}

impl<T: Copy, L: NestingLock> LockedCell<T, L> {
    /// Replaces the value with `f(value)` and returns the new value.
    #[inline]
    pub fn update<F>(&self, key: L::Key<'_>, f: F) -> T
    where
        F: FnOnce(T) -> T,
    {
        let new = f(self.get(key));
        self.set(key, new);
        new
    }
}

impl<T: Default, L: NestingLock> LockedCell<T, L> {
    pub fn take(&self, key: L::Key<'_>) -> T {
        self.replace(key, Default::default())
    }
}

impl<T: Default, L: NestingLock> Default for LockedCell<T, L> {
    #[inline]
    fn default() -> LockedCell<T, L> {
        LockedCell::new(Default::default())
    }
}

/// A `RefCell` whose value can only be borrowed while holding lock `L`.
///
/// Borrows cannot outlive the key, so they end with the lock section.
pub struct LockedRefCell<T: ?Sized, L: NestingLock> {
    _phantom: PhantomData<L>,
    value: RefCell<T>,
}

unsafe impl<T: ?Sized, L: NestingLock> Send for LockedRefCell<T, L>
where
    T: Send,
    L: Send,
{
}

unsafe impl<T: ?Sized, L: NestingLock> Sync for LockedRefCell<T, L> where L: Sync {}

impl<T, L: NestingLock> LockedRefCell<T, L> {
    pub const fn new(value: T) -> LockedRefCell<T, L> {
        LockedRefCell {
            _phantom: PhantomData,
            value: RefCell::new(value),
        }
    }

    #[inline]
    pub fn replace(&self, _key: L::Key<'_>, t: T) -> T {
        self.value.replace(t)
    }
}

impl<T: ?Sized, L: NestingLock> LockedRefCell<T, L> {
    #[inline]
    pub fn borrow<'key, 'a: 'key>(&'a self, _key: L::Key<'key>) -> Ref<'key, T> {
        self.value.borrow()
    }

    #[inline]
    pub fn try_borrow<'key, 'a: 'key>(
        &'a self,
        _key: L::Key<'key>,
    ) -> Result<Ref<'key, T>, BorrowError> {
        self.value.try_borrow()
    }

    #[inline]
    pub fn borrow_mut<'key, 'a: 'key>(&'a self, _key: L::Key<'key>) -> RefMut<'key, T> {
        self.value.borrow_mut()
    }
}

impl<T: Default, L: NestingLock> LockedRefCell<T, L> {
    pub fn take(&self, _key: L::Key<'_>) -> T {
        self.value.take()
    }
}

impl<T: Default, L: NestingLock> Default for LockedRefCell<T, L> {
    #[inline]
    fn default() -> LockedRefCell<T, L> {
        LockedRefCell::new(Default::default())
    }
}
