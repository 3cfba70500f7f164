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

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use super::handlers::{erase, Callback, HandlerMap, SubscriptionId};

/// A bus that invokes handlers inline, on the publisher's thread.
///
/// Publishing takes a snapshot of the matching handlers before calling them,
/// so handlers may publish, subscribe or unsubscribe re-entrantly. Changes
/// made during a publish apply from the next publish on. Recursion depth is
/// the caller's responsibility.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use khora_threads::SyncMessageBus;
///
/// struct WindowResized { width: u32 }
///
/// let bus = SyncMessageBus::new();
/// let last_width = Arc::new(AtomicU32::new(0));
/// let sink = Arc::clone(&last_width);
/// bus.subscribe(move |event: &WindowResized| sink.store(event.width, Ordering::SeqCst));
///
/// bus.publish(&WindowResized { width: 1280 });
/// assert_eq!(last_width.load(Ordering::SeqCst), 1280);
/// ```
#[derive(Debug, Default)]
pub struct SyncMessageBus {
    handlers: RwLock<HandlerMap>,
    next_id: AtomicU64,
}

impl SyncMessageBus {
    /// Creates a bus without subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of type `E`.
    pub fn subscribe<E, F>(&self, handler: F) -> SubscriptionId
    where
        E: Any,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<E>(), id, erase(handler));
        id
    }

    /// Removes a subscription. Returns `false` if it did not exist.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Calls every handler subscribed to `E`, in subscription order.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish<E: Any>(&self, event: &E) -> usize {
        let snapshot: Vec<Callback> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers(TypeId::of::<E>())
            .cloned()
            .collect();

        for handler in &snapshot {
            handler(event);
        }
        snapshot.len()
    }

    /// Number of handlers subscribed to `E`.
    pub fn handler_count<E: Any>(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .count(TypeId::of::<E>())
    }

    /// Returns `true` if the bus has no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
            == 0
    }
}

impl Clone for SyncMessageBus {
    /// Copies the subscription table; both buses then evolve independently
    /// and keep handing out distinct ids from the same starting point.
    fn clone(&self) -> Self {
        Self {
            handlers: RwLock::new(
                self.handlers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            next_id: AtomicU64::new(self.next_id.load(Ordering::Acquire)),
        }
    }
}
