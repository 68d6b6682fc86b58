use super::NestingLock;
use core::marker::PhantomData;

#[derive(Clone, Copy, Debug)]
pub struct PreemptLockKey<'lock> {
    _private: PhantomData<&'lock ()>,
}

impl PreemptLockKey<'_> {
    /// Creates a pre-emption lock token.
    ///
    /// # Safety
    /// The caller must be inside a section that holds the lock for the whole
    /// lifetime of the key.
    #[inline(always)]
    pub(crate) unsafe fn new() -> Self {
        PreemptLockKey {
            _private: PhantomData,
        }
    }
}

/// The kernel lock.
///
/// Built on the platform critical section. Nested acquisition from the same
/// thread of execution is allowed. Code inside the lock must not suspend the
/// calling context or abandon it, since the section would then never end.
pub struct PreemptLock {}

impl PreemptLock {
    #[inline(always)]
    pub fn with<R>(f: impl FnOnce(PreemptLockKey<'_>) -> R) -> R {
        critical_section::with(|_cs| {
            let key = unsafe { PreemptLockKey::new() };
            f(key)
        })
    }
}

unsafe impl Send for PreemptLock {}
unsafe impl Sync for PreemptLock {}

impl NestingLock for PreemptLock {
    type Key<'a> = PreemptLockKey<'a>;

    fn with<R>(f: impl FnOnce(Self::Key<'_>) -> R) -> R {
        Self::with(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::LockedCell;

    #[test]
    fn lock_nests_on_same_thread() {
        static DEPTH: LockedCell<u32, PreemptLock> = LockedCell::new(0);
        let depth = PreemptLock::with(|outer| {
            DEPTH.set(outer, 1);
            PreemptLock::with(|inner| DEPTH.update(inner, |d| d + 1))
        });
        assert_eq!(depth, 2);
    }
}
