use crate::RawSpin;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A spinlock protecting a value of type `T`.
///
/// Access goes through an RAII guard that releases the lock on drop, so a
/// critical section cannot accidentally outlive its lexical scope. For the
/// cases where a guard is inconvenient (locks embedded in raw memory), use
/// [`RawSpin`] directly.
///
/// # Examples
///
/// ```
/// use kernel_sync::SpinLock;
///
/// let counter = SpinLock::new(0_u32);
///
/// {
///     let mut guard = counter.lock();
///     *guard += 1;
/// } // unlocked here
///
/// assert_eq!(*counter.lock(), 1);
/// ```
///
/// Non-blocking acquisition:
///
/// ```
/// use kernel_sync::SpinLock;
///
/// let l = SpinLock::new("idle");
/// let guard = l.try_lock().expect("uncontended");
/// assert!(l.try_lock().is_none());
/// drop(guard);
/// assert!(l.try_lock().is_some());
/// ```
pub struct SpinLock<T> {
    raw: RawSpin,
    cell: UnsafeCell<T>,
}

// Safety: the raw lock provides mutual exclusion, so sharing the lock across
// threads only requires that the protected value itself may be sent.
unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked `SpinLock` around `value`.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawSpin::new(),
            cell: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is available.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.raw.lock();
        SpinLockGuard { lock: self }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `None` if the lock is currently held elsewhere.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Runs `f` with exclusive access to the protected value.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }

    /// Returns a mutable reference to the protected value.
    ///
    /// `&mut self` proves there are no other users, so no locking is needed.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }
}

/// RAII guard for a [`SpinLock`]; releases the lock when dropped.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard holds the lock exclusively.
        unsafe { &*self.lock.cell.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the lock exclusively.
        unsafe { &mut *self.lock.cell.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Safety: this guard was created by a successful acquisition.
        unsafe { self.lock.raw.unlock() }
    }
}
