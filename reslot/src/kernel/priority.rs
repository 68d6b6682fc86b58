use crate::config::NUM_PRIORITIES;

/// Thread priority. Lower values are more urgent, `0` is the highest priority.
pub type ThreadPriority = u8;

pub const LOWEST_PRIORITY: ThreadPriority = (NUM_PRIORITIES - 1) as ThreadPriority;

#[inline(always)]
pub const fn is_valid_priority(priority: ThreadPriority) -> bool {
    (priority as usize) < NUM_PRIORITIES
}

/// `true` if a thread at priority `a` must run before one at `b`.
#[inline(always)]
pub(crate) const fn is_more_urgent(a: ThreadPriority, b: ThreadPriority) -> bool {
    a < b
}
