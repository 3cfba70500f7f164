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

//! The publish-then-wait half of the owner-thread handshake.
//!
//! An owner thread builds its working set (task queue, group map, handler
//! table) on its own stack, then publishes the piece other threads need to
//! reach it. Callers that arrive before publication block until it happens.

use std::fmt;
use std::sync::{Condvar, Mutex, OnceLock, PoisonError};

/// A slot that is written once and read many times.
pub struct Publication<T> {
    value: OnceLock<T>,
    lock: Mutex<()>,
    published: Condvar,
}

impl<T> Publication<T> {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self {
            value: OnceLock::new(),
            lock: Mutex::new(()),
            published: Condvar::new(),
        }
    }

    /// Publishes `value` and wakes every waiter.
    ///
    /// Returns the value back if the slot was already published.
    pub fn publish(&self, value: T) -> Result<(), T> {
        self.value.set(value)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.published.notify_all();
        Ok(())
    }

    /// Returns the value if it has been published.
    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    /// Blocks until the value is published.
    pub fn wait(&self) -> &T {
        if let Some(value) = self.value.get() {
            return value;
        }

        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(value) = self.value.get() {
                return value;
            }
            guard = self
                .published
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns `true` once the value is visible.
    pub fn is_published(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<T> Default for Publication<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Publication<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("published", &self.is_published())
            .finish()
    }
}
