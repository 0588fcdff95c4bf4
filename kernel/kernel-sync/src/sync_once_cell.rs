use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const BUSY: u8 = 1;
const READY: u8 = 2;

/// A spin-based cell that is written at most once.
///
/// The first caller of [`get_or_init`](Self::get_or_init) to observe the
/// empty state runs the initializer; concurrent callers spin until the value
/// is published. Once initialized the cell only ever hands out shared
/// references, which makes it a good home for process-wide subsystem state
/// that is set up once and then read from every thread.
///
/// A panicking initializer leaves the cell permanently busy; initializers
/// must not panic.
///
/// # Examples
///
/// ```
/// use kernel_sync::SyncOnceCell;
///
/// static LIMIT: SyncOnceCell<usize> = SyncOnceCell::new();
///
/// assert!(LIMIT.get().is_none());
/// let v = LIMIT.get_or_init(|| 64);
/// assert_eq!(*v, 64);
/// assert_eq!(LIMIT.get(), Some(&64));
/// ```
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

// Safety: after READY the value is only accessed through shared references;
// before that, exactly one thread (the initializer) touches it.
unsafe impl<T: Sync> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    /// Creates an empty cell.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns the value if the cell has been initialized.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // Safety: READY is only stored after the value is fully written.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Returns the value, initializing the cell with `init` if it is empty.
    ///
    /// Exactly one concurrent caller runs `init`; the others spin until the
    /// value becomes visible. The winning write is published with release
    /// ordering and observed with acquire loads.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(v) = self.get() {
            return v;
        }

        if self
            .state
            .compare_exchange(UNINIT, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            // Safety: the CAS makes this thread the only writer.
            unsafe {
                (*self.value.get()).write(init());
            }
            self.state.store(READY, Ordering::Release);
        } else {
            while self.state.load(Ordering::Acquire) != READY {
                spin_loop();
            }
        }

        // Safety: READY observed (or just stored) above.
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // Safety: READY implies the value was written and never taken out.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}
