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

//! The wake-up half of the owner-thread handshake.
//!
//! An idle owner thread arms the slot with its semaphore, re-checks its work
//! sources, and only then parks. A producer that has just pushed work calls
//! [`ResumeSlot::notify`], which disarms the slot and releases the semaphore.
//! Either the owner's re-check sees the new work or the producer sees the
//! armed slot, so a wake-up is never lost.

use std::fmt;
use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::semaphore::BinarySemaphore;

/// A one-shot wake-up slot owned by a single parking thread.
#[derive(Default)]
pub struct ResumeSlot {
    armed: AtomicBool,
    semaphore: OnceLock<BinarySemaphore>,
}

impl ResumeSlot {
    /// Creates a disarmed slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks the calling thread unless `has_work` reports pending work after
    /// the slot is armed.
    ///
    /// Must only be called from the owning thread. May return without a
    /// matching [`notify`](Self::notify); callers loop and re-check.
    pub fn park_unless(&self, has_work: impl Fn() -> bool) {
        let semaphore = self.semaphore.get_or_init(BinarySemaphore::new);

        self.armed.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        if has_work() {
            self.armed.store(false, Ordering::SeqCst);
            return;
        }

        semaphore.acquire();
    }

    /// Wakes the owner if it is parked or about to park.
    ///
    /// Returns `true` if this call released the owner.
    pub fn notify(&self) -> bool {
        fence(Ordering::SeqCst);
        if !self.armed.swap(false, Ordering::SeqCst) {
            return false;
        }
        match self.semaphore.get() {
            Some(semaphore) => {
                semaphore.release();
                true
            }
            None => false,
        }
    }

    /// Returns `true` while the owner is parked or about to park.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ResumeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumeSlot")
            .field("armed", &self.is_armed())
            .finish()
    }
}
