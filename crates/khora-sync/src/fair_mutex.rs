// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A FIFO-fair ticket lock.
//!
//! Each locker takes a ticket and enters when the serving counter reaches it,
//! so threads enter in the order they arrived. A waiter spins (yielding) for a
//! bounded number of iterations, then parks until the unlocker hands the lock
//! to its ticket. Unlock wakes only the thread holding the next ticket.
//!
//! The lock is not reentrant: locking twice from the same owner deadlocks.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, Thread};

/// Spin iterations before a waiter parks.
pub const DEFAULT_SPIN_BUDGET: usize = 100;

/// The bare ticket lock, without protected data.
pub struct RawFairMutex {
    next_ticket: AtomicUsize,
    now_serving: AtomicUsize,
    spin_budget: usize,
    // Number of threads parked (or about to park) in `sleepers`.
    sleeping: AtomicUsize,
    sleepers: Mutex<HashMap<usize, Thread>>,
}

impl RawFairMutex {
    /// Creates an unlocked mutex with the default spin budget.
    pub fn new() -> Self {
        Self::with_spin_budget(DEFAULT_SPIN_BUDGET)
    }

    /// Creates an unlocked mutex that spins `spin_budget` times before parking.
    pub fn with_spin_budget(spin_budget: usize) -> Self {
        Self {
            next_ticket: AtomicUsize::new(0),
            now_serving: AtomicUsize::new(0),
            spin_budget,
            sleeping: AtomicUsize::new(0),
            sleepers: Mutex::new(HashMap::new()),
        }
    }

    /// Takes a ticket and blocks until it is served.
    pub fn lock(&self) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        for _ in 0..self.spin_budget {
            if self.now_serving.load(Ordering::Acquire) == ticket {
                return;
            }
            thread::yield_now();
        }

        self.park_until_served(ticket);
    }

    /// Enters only if nobody holds or waits for the lock.
    pub fn try_lock(&self) -> bool {
        let ticket = self.next_ticket.load(Ordering::Relaxed);
        if self.now_serving.load(Ordering::Acquire) != ticket {
            return false;
        }
        self.next_ticket
            .compare_exchange(ticket, ticket.wrapping_add(1), Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Hands the lock to the next ticket.
    ///
    /// Calling this without holding the lock is a logic error that breaks
    /// the ticket order for every later locker.
    pub fn unlock(&self) {
        debug_assert!(self.is_locked(), "unlock of an unlocked FairMutex");

        let next = self.now_serving.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        if self.sleeping.load(Ordering::SeqCst) == 0 {
            return;
        }

        let sleeper = self
            .sleepers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&next);
        if let Some(thread) = sleeper {
            thread.unpark();
        }
    }

    /// Returns `true` while a ticket is being served.
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }

    /// Tickets issued but not yet released: the holder plus every waiter.
    pub fn queue_len(&self) -> usize {
        let serving = self.now_serving.load(Ordering::Relaxed);
        self.next_ticket
            .load(Ordering::Relaxed)
            .wrapping_sub(serving)
    }

    fn park_until_served(&self, ticket: usize) {
        {
            let mut sleepers = self.sleepers.lock().unwrap_or_else(PoisonError::into_inner);
            self.sleeping.fetch_add(1, Ordering::SeqCst);
            if self.now_serving.load(Ordering::SeqCst) == ticket {
                self.sleeping.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            sleepers.insert(ticket, thread::current());
        }

        while self.now_serving.load(Ordering::Acquire) != ticket {
            thread::park();
        }

        // The unlocker normally removes the entry; a spurious wake-up that
        // raced the hand-off can leave it behind.
        self.sleepers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ticket);
        self.sleeping.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for RawFairMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawFairMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFairMutex")
            .field("next_ticket", &self.next_ticket.load(Ordering::Relaxed))
            .field("now_serving", &self.now_serving.load(Ordering::Relaxed))
            .finish()
    }
}

/// A ticket lock protecting a value of type `T`.
///
/// # Example
///
/// ```rust
/// use khora_sync::FairMutex;
///
/// let frame_log = FairMutex::new(Vec::new());
/// frame_log.lock().push("shadow pass");
/// assert_eq!(frame_log.lock().len(), 1);
/// ```
pub struct FairMutex<T: ?Sized> {
    raw: RawFairMutex,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialised by `raw`.
unsafe impl<T: ?Sized + Send> Send for FairMutex<T> {}
// SAFETY: only one guard can exist at a time, so sharing the mutex only hands
// `T` across threads, which `T: Send` allows.
unsafe impl<T: ?Sized + Send> Sync for FairMutex<T> {}

impl<T> FairMutex<T> {
    /// Creates an unlocked mutex holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            raw: RawFairMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Creates an unlocked mutex with a custom spin budget.
    pub fn with_spin_budget(value: T, spin_budget: usize) -> Self {
        Self {
            raw: RawFairMutex::with_spin_budget(spin_budget),
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the mutex and returns the value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> FairMutex<T> {
    /// Blocks until this thread's ticket is served.
    pub fn lock(&self) -> FairMutexGuard<'_, T> {
        self.raw.lock();
        FairMutexGuard {
            mutex: self,
            _marker: PhantomData,
        }
    }

    /// Returns a guard only if the lock is free and uncontended.
    pub fn try_lock(&self) -> Option<FairMutexGuard<'_, T>> {
        self.raw.try_lock().then(|| FairMutexGuard {
            mutex: self,
            _marker: PhantomData,
        })
    }

    /// Mutable access without locking; the borrow checker proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Returns `true` while some guard is alive.
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// The guard holder plus every thread queued behind it.
    pub fn queue_len(&self) -> usize {
        self.raw.queue_len()
    }
}

impl<T: Default> Default for FairMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for FairMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FairMutex")
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

/// Grants access to the data of a locked [`FairMutex`]; unlocks on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct FairMutexGuard<'a, T: ?Sized> {
    mutex: &'a FairMutex<T>,
    _marker: PhantomData<&'a mut T>,
}

impl<T: ?Sized> Deref for FairMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves this thread's ticket is being served.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for FairMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and `&mut self` rules out aliasing through this guard.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for FairMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for FairMutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
