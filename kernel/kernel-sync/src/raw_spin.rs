use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// A raw test-and-set spinlock.
///
/// `RawSpin` carries no data and hands out no guards; callers pair
/// [`lock`](Self::lock)/[`try_lock`](Self::try_lock) with an explicit
/// [`unlock`](Self::unlock). That makes it suitable for structures whose
/// lifetime and placement Rust does not manage, e.g. a lock embedded in a
/// `repr(C)` header written into raw pages, or critical sections whose
/// bounds do not nest lexically (hand-over-hand locking).
///
/// The lock is unfair and does not disable interrupts; keep critical
/// sections short and free of blocking calls.
///
/// # Examples
///
/// ```
/// use kernel_sync::RawSpin;
///
/// let lock = RawSpin::new();
/// assert!(lock.try_lock());
/// assert!(!lock.try_lock());
/// unsafe { lock.unlock() };
/// ```
pub struct RawSpin {
    held: AtomicBool,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    /// Creates a new, unlocked lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Spins until the lock is acquired.
    ///
    /// Uses a test-and-test-and-set loop: contended waiters spin on a plain
    /// load so the owning core's cache line is not invalidated on every
    /// iteration.
    #[inline]
    pub fn lock(&self) {
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock once, without spinning.
    ///
    /// Returns `true` if the lock was taken. This is the entry point for
    /// single-winner patterns: concurrent callers race, exactly one
    /// proceeds, the rest observe `false` and move on.
    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.held.swap(true, Ordering::Acquire)
    }

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The caller must currently hold the lock via a successful
    /// [`lock`](Self::lock) or [`try_lock`](Self::try_lock). Unlocking a
    /// lock held by another thread (or not held at all) breaks mutual
    /// exclusion for every other user.
    #[inline]
    pub unsafe fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }

    /// Returns whether the lock is currently held by someone.
    ///
    /// Purely advisory; the answer may be stale by the time it is read.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }
}
