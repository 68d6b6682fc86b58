use crate::cell::LockedCell;
use crate::config::MIN_STACK_SIZE;
use crate::kernel::hal::StackAlignment;
use crate::sync::{PreemptLock, PreemptLockKey};
use aligned::Aligned;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

const CANARY_BYTE: u8 = 0x55;
const CANARY_SIZE: usize = {
    let align = core::mem::align_of::<StackAlignment>();
    if align > 16 { align } else { 16 }
};

const _: () = assert!(MIN_STACK_SIZE > CANARY_SIZE);

/// Caller-owned stack region for a thread.
///
/// The lowest bytes of the region hold a canary that is painted when a thread
/// is bound to the stack, and checked when the thread exits. A region can be
/// bound to one live thread at a time.
pub struct Stack<const SIZE: usize> {
    memory: UnsafeCell<Aligned<StackAlignment, [MaybeUninit<u8>; SIZE]>>,
    bound: LockedCell<bool, PreemptLock>,
}

unsafe impl<const SIZE: usize> Sync for Stack<SIZE> {}

impl<const SIZE: usize> Stack<SIZE> {
    pub const fn new() -> Stack<SIZE> {
        Stack {
            memory: UnsafeCell::new(Aligned([MaybeUninit::uninit(); SIZE])),
            bound: LockedCell::new(false),
        }
    }

    pub const fn size(&self) -> usize {
        SIZE
    }

    /// Start of the region, at the overflow end where the canary lives.
    pub const fn as_ptr(&self) -> *mut u8 {
        self.memory.get() as *mut u8
    }

    pub(crate) fn region(&'static self) -> StackRegion {
        StackRegion {
            // SAFETY: UnsafeCell::get never returns null
            base: unsafe { NonNull::new_unchecked(self.as_ptr()) },
            size: SIZE,
            bound: &self.bound,
        }
    }
}

impl<const SIZE: usize> Default for Stack<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

/// Size-erased view to a statically allocated [`Stack`].
#[derive(Clone, Copy)]
pub(crate) struct StackRegion {
    base: NonNull<u8>,
    size: usize,
    bound: &'static LockedCell<bool, PreemptLock>,
}

unsafe impl Send for StackRegion {}

impl StackRegion {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_bound(&self, pkey: PreemptLockKey<'_>) -> bool {
        self.bound.get(pkey)
    }

    /// Marks the region as used and paints the canary. The rest of the
    /// region is zeroed.
    pub fn bind(&self, pkey: PreemptLockKey<'_>) {
        self.bound.set(pkey, true);
        let canary = CANARY_SIZE.min(self.size);
        unsafe {
            core::ptr::write_bytes(self.base.as_ptr(), CANARY_BYTE, canary);
            core::ptr::write_bytes(self.base.as_ptr().add(canary), 0, self.size - canary);
        }
    }

    pub fn unbind(&self, pkey: PreemptLockKey<'_>) {
        self.bound.set(pkey, false);
    }

    pub fn is_intact(&self, _pkey: PreemptLockKey<'_>) -> bool {
        let canary = unsafe {
            core::slice::from_raw_parts(self.base.as_ptr(), CANARY_SIZE.min(self.size))
        };
        canary.iter().all(|&b| b == CANARY_BYTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canary_detects_overwrite() {
        static STACK: Stack<512> = Stack::new();
        let region = STACK.region();
        PreemptLock::with(|pkey| {
            assert!(!region.is_bound(pkey));
            region.bind(pkey);
            assert!(region.is_bound(pkey));
            assert!(region.is_intact(pkey));

            unsafe { STACK.as_ptr().add(3).write(0) };
            assert!(!region.is_intact(pkey));

            region.unbind(pkey);
            assert!(!region.is_bound(pkey));
        });
    }

    #[test]
    fn region_reports_size() {
        static STACK: Stack<1024> = Stack::new();
        assert_eq!(STACK.size(), 1024);
        assert_eq!(STACK.region().size(), 1024);
    }
}
