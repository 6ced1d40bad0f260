//! Mutex, condition variable and thread primitives.
//!
//! With the `threads` feature (the default) these wrap `parking_lot` and
//! `std::thread`. Without it every primitive keeps the same signature but
//! degrades: locking is free, condition waits report [`WaitResult::TimedOut`]
//! immediately and spawning a thread fails with [`IioError::NotSupported`].
//! Callers must treat the degraded build as a valid configuration.
//!
//! Locks are not recursive. Locking a mutex twice from the same thread
//! deadlocks (or panics in the degraded build).
//!
//! [`IioError::NotSupported`]: crate::error::IioError::NotSupported

use std::time::Duration;

/// Outcome of [`IioCond::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Woken by [`IioCond::signal`] or [`IioCond::broadcast`]
    Signaled,
    /// The timeout elapsed first
    TimedOut,
}

impl WaitResult {
    /// True when the wait ended because of the timeout.
    pub fn timed_out(self) -> bool {
        self == Self::TimedOut
    }
}

/// Convert a millisecond timeout where 0 means "wait forever".
pub fn timeout_from_ms(timeout_ms: u32) -> Option<Duration> {
    (timeout_ms > 0).then(|| Duration::from_millis(u64::from(timeout_ms)))
}

#[cfg(feature = "threads")]
mod imp {
    use std::thread::JoinHandle;
    use std::time::Duration;

    use super::WaitResult;
    use crate::error::{IioError, Result};

    /// Non-recursive mutual exclusion lock.
    #[derive(Debug, Default)]
    pub struct IioMutex<T> {
        inner: parking_lot::Mutex<T>,
    }

    /// RAII guard returned by [`IioMutex::lock`].
    pub type IioMutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;

    impl<T> IioMutex<T> {
        /// Create a new unlocked mutex.
        pub fn new(value: T) -> Self {
            Self {
                inner: parking_lot::Mutex::new(value),
            }
        }

        /// Block until the lock is acquired.
        pub fn lock(&self) -> IioMutexGuard<'_, T> {
            self.inner.lock()
        }

        /// Acquire the lock only if it is free.
        pub fn try_lock(&self) -> Option<IioMutexGuard<'_, T>> {
            self.inner.try_lock()
        }

        /// Consume the mutex and return the protected value.
        pub fn into_inner(self) -> T {
            self.inner.into_inner()
        }
    }

    /// Condition variable paired with an [`IioMutex`].
    #[derive(Debug, Default)]
    pub struct IioCond {
        inner: parking_lot::Condvar,
    }

    impl IioCond {
        /// Create a new condition variable.
        pub fn new() -> Self {
            Self::default()
        }

        /// Atomically release `guard`, wait for a signal, and reacquire.
        ///
        /// `None` waits forever.
        pub fn wait<T>(
            &self,
            guard: &mut IioMutexGuard<'_, T>,
            timeout: Option<Duration>,
        ) -> WaitResult {
            match timeout {
                None => {
                    self.inner.wait(guard);
                    WaitResult::Signaled
                }
                Some(timeout) => {
                    if self.inner.wait_for(guard, timeout).timed_out() {
                        WaitResult::TimedOut
                    } else {
                        WaitResult::Signaled
                    }
                }
            }
        }

        /// Wake at least one waiter.
        pub fn signal(&self) {
            self.inner.notify_one();
        }

        /// Wake every waiter.
        pub fn broadcast(&self) {
            self.inner.notify_all();
        }
    }

    /// Handle to a named OS thread.
    #[derive(Debug)]
    pub struct IioThread<T> {
        handle: JoinHandle<T>,
    }

    impl<T: Send + 'static> IioThread<T> {
        /// Spawn a named thread running `f`.
        pub fn spawn<F>(name: &str, f: F) -> Result<Self>
        where
            F: FnOnce() -> T + Send + 'static,
        {
            let handle = std::thread::Builder::new()
                .name(name.to_string())
                .spawn(f)?;
            Ok(Self { handle })
        }

        /// Wait for the thread to finish and return its result.
        pub fn join(self) -> Result<T> {
            self.handle
                .join()
                .map_err(|_| IioError::Io(std::io::Error::other("thread panicked")))
        }
    }
}

#[cfg(not(feature = "threads"))]
mod imp {
    use std::cell::{RefCell, RefMut};
    use std::marker::PhantomData;
    use std::ops::{Deref, DerefMut};
    use std::time::Duration;

    use super::WaitResult;
    use crate::error::{IioError, Result};

    /// Mutex for builds without native threading.
    #[derive(Debug, Default)]
    pub struct IioMutex<T> {
        inner: RefCell<T>,
    }

    // SAFETY: without the `threads` feature the crate never creates threads
    // (IioThread::spawn always fails), so the cell is only reached from the
    // thread that owns the context.
    #[allow(unsafe_code)]
    unsafe impl<T: Send> Sync for IioMutex<T> {}

    /// Guard returned by [`IioMutex::lock`].
    pub struct IioMutexGuard<'a, T> {
        inner: RefMut<'a, T>,
    }

    impl<T> Deref for IioMutexGuard<'_, T> {
        type Target = T;

        fn deref(&self) -> &T {
            &self.inner
        }
    }

    impl<T> DerefMut for IioMutexGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut T {
            &mut self.inner
        }
    }

    impl<T> IioMutex<T> {
        /// Create a new mutex.
        pub fn new(value: T) -> Self {
            Self {
                inner: RefCell::new(value),
            }
        }

        /// Borrow the protected value.
        pub fn lock(&self) -> IioMutexGuard<'_, T> {
            IioMutexGuard {
                inner: self.inner.borrow_mut(),
            }
        }

        /// Borrow the protected value if no guard is alive.
        pub fn try_lock(&self) -> Option<IioMutexGuard<'_, T>> {
            self.inner
                .try_borrow_mut()
                .ok()
                .map(|inner| IioMutexGuard { inner })
        }

        /// Consume the mutex and return the protected value.
        pub fn into_inner(self) -> T {
            self.inner.into_inner()
        }
    }

    /// Condition variable stub; waits never block.
    #[derive(Debug, Default)]
    pub struct IioCond;

    impl IioCond {
        /// Create a new condition variable.
        pub fn new() -> Self {
            Self
        }

        /// Always reports a timeout.
        pub fn wait<T>(
            &self,
            _guard: &mut IioMutexGuard<'_, T>,
            _timeout: Option<Duration>,
        ) -> WaitResult {
            WaitResult::TimedOut
        }

        /// No-op.
        pub fn signal(&self) {}

        /// No-op.
        pub fn broadcast(&self) {}
    }

    /// Thread handle stub; threads cannot be created.
    #[derive(Debug)]
    pub struct IioThread<T> {
        _marker: PhantomData<T>,
    }

    impl<T: Send + 'static> IioThread<T> {
        /// Always fails with [`IioError::NotSupported`].
        pub fn spawn<F>(_name: &str, _f: F) -> Result<Self>
        where
            F: FnOnce() -> T + Send + 'static,
        {
            Err(IioError::NotSupported)
        }

        /// Always fails with [`IioError::NotSupported`].
        pub fn join(self) -> Result<T> {
            Err(IioError::NotSupported)
        }
    }
}

pub use imp::{IioCond, IioMutex, IioMutexGuard, IioThread};
