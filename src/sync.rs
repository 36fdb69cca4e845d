//! Synchronization primitives for ISR-safe access.
//!
//! The interrupt path shares exactly two things with the deferred worker: the
//! event ring and the worker's wake handle. Both sit behind a critical
//! section so the interrupt side never waits on a lock the worker could hold
//! across real work.

use core::cell::RefCell;
use std::thread::Thread;

use critical_section::Mutex;

/// Cell providing interior mutability with critical section protection.
///
/// Combines `critical_section::Mutex` with `RefCell` for safe mutable access
/// from both normal code and interrupt handlers.
pub struct CriticalSectionCell<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> CriticalSectionCell<T> {
    /// Create a new cell (const, suitable for static initialization).
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Execute a closure with exclusive mutable access.
    ///
    /// Keep the closure short; it runs inside the critical section.
    #[inline]
    pub fn with<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        critical_section::with(|cs| {
            let mut value = self.inner.borrow_ref_mut(cs);
            f(&mut value)
        })
    }
}

// SAFETY: CriticalSectionCell uses critical sections to protect all access.
unsafe impl<T: Send> Sync for CriticalSectionCell<T> {}

/// Interrupt-safe handle to the thread that drains deferred work.
///
/// The worker registers itself before each pass over the event ring; the
/// interrupt path wakes it after queueing events. Registration before the
/// pass means an event queued while the slot is empty is still seen.
pub struct WorkerWaker {
    thread: CriticalSectionCell<Option<Thread>>,
}

impl WorkerWaker {
    /// Create a new empty waker (const, suitable for static initialization).
    pub const fn new() -> Self {
        Self {
            thread: CriticalSectionCell::new(None),
        }
    }

    /// Register a thread to be woken later.
    pub fn register(&self, thread: Thread) {
        self.thread.with(|slot| match slot {
            Some(existing) if existing.id() == thread.id() => {
                // Same thread, no action needed
            }
            _ => *slot = Some(thread),
        });
    }

    /// Wake the registered thread, if any (clears the registration).
    #[inline]
    pub fn wake(&self) {
        let thread = self.thread.with(Option::take);
        if let Some(t) = thread {
            t.unpark();
        }
    }
}

impl Default for WorkerWaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn registered(waker: &WorkerWaker) -> bool {
        waker.thread.with(|slot| slot.is_some())
    }

    #[test]
    fn critical_section_cell_with_mutates() {
        let cell: CriticalSectionCell<u32> = CriticalSectionCell::new(0);
        cell.with(|v| *v += 10);
        assert_eq!(cell.with(|v| *v), 10);
    }

    #[test]
    fn critical_section_cell_static_usage() {
        static CELL: CriticalSectionCell<u32> = CriticalSectionCell::new(0);
        CELL.with(|v| *v = 100);
        assert_eq!(CELL.with(|v| *v), 100);
    }

    #[test]
    fn waker_new_is_empty() {
        assert!(!registered(&WorkerWaker::new()));
        assert!(!registered(&WorkerWaker::default()));
    }

    #[test]
    fn waker_wake_clears_registration() {
        let waker = WorkerWaker::new();
        waker.register(std::thread::current());
        assert!(registered(&waker));

        waker.wake();
        assert!(!registered(&waker));

        // Second wake is a no-op
        waker.wake();
    }

    #[test]
    fn waker_unparks_registered_thread() {
        let waker = Arc::new(WorkerWaker::new());
        let woke = Arc::new(AtomicBool::new(false));

        let handle = {
            let waker = Arc::clone(&waker);
            let woke = Arc::clone(&woke);
            std::thread::spawn(move || {
                waker.register(std::thread::current());
                std::thread::park_timeout(Duration::from_secs(5));
                woke.store(true, Ordering::SeqCst);
            })
        };

        while !registered(&waker) {
            std::thread::yield_now();
        }
        waker.wake();
        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }
}
