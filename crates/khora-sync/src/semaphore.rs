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

//! A binary semaphore used to park idle owner threads.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// A semaphore whose count saturates at one.
///
/// Releasing an already-released semaphore is a no-op, so any number of
/// wake-ups that arrive before the owner parks collapse into a single permit.
/// Clones share the same permit.
#[derive(Debug, Clone, Default)]
pub struct BinarySemaphore {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl BinarySemaphore {
    /// Creates a semaphore without a permit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let (lock, cvar) = &*self.inner;
        let mut permit = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*permit {
            permit = cvar.wait(permit).unwrap_or_else(PoisonError::into_inner);
        }
        *permit = false;
    }

    /// Makes a permit available and wakes one waiter.
    pub fn release(&self) {
        let (lock, cvar) = &*self.inner;
        {
            let mut permit = lock.lock().unwrap_or_else(PoisonError::into_inner);
            *permit = true;
        }
        cvar.notify_one();
    }
}
