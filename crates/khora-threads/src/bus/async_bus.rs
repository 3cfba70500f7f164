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

//! A message bus that delivers events on its own thread.
//!
//! Cross-thread publishes and subscription changes travel through a queue
//! built on the bus thread, so the handler table is only ever touched there.
//! Events published by a handler (that is, from the bus thread itself) skip
//! the queue and land in a thread-local cache. Each cycle drains the queue
//! completely and then the cache completely, so re-entrant publishes run
//! after the batch that produced them instead of recursing.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use khora_sync::{affinity, BinarySemaphore, Identity, Publication, Registered, ResumeSlot};

use super::handlers::{erase, Callback, HandlerMap, SubscriptionId};
use crate::config::AsyncBusConfig;
use crate::panic::panic_message;
use crate::RuntimeError;

struct Message {
    kind: TypeId,
    event: Box<dyn Any + Send>,
}

enum Envelope {
    Event(Message),
    Subscribe {
        kind: TypeId,
        id: SubscriptionId,
        callback: Callback,
    },
    Unsubscribe(SubscriptionId),
    Flush(BinarySemaphore),
}

thread_local! {
    // Events published by handlers while the bus thread is draining.
    static CACHE: RefCell<VecDeque<Message>> = const { RefCell::new(VecDeque::new()) };
}

/// Delivery counters of an [`AsyncMessageBus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsyncBusStats {
    /// Handler invocations that returned normally.
    pub delivered: u64,
    /// Handler invocations that panicked.
    pub failed: u64,
}

struct AsyncBusShared {
    name: String,
    queue: Publication<Sender<Envelope>>,
    resume: ResumeSlot,
    stop: AtomicBool,
    posting: AtomicUsize,
    next_subscription: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl AsyncBusShared {
    fn new(name: String) -> Self {
        Self {
            name,
            queue: Publication::new(),
            resume: ResumeSlot::new(),
            stop: AtomicBool::new(false),
            posting: AtomicUsize::new(0),
            next_subscription: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn post(&self, envelope: Envelope) -> Result<(), RuntimeError> {
        const STOPPED: RuntimeError = RuntimeError::Stopped {
            owner: "message bus",
        };

        self.posting.fetch_add(1, Ordering::SeqCst);
        if self.stop.load(Ordering::SeqCst) {
            self.posting.fetch_sub(1, Ordering::SeqCst);
            log::warn!("Message bus '{}': rejected a post after stop.", self.name);
            return Err(STOPPED);
        }

        let sent = self.queue.wait().send(envelope);
        self.posting.fetch_sub(1, Ordering::SeqCst);
        sent.map_err(|_| STOPPED)?;

        self.resume.notify();
        Ok(())
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.resume.notify();
    }

    fn deliver(&self, handlers: &HandlerMap, message: &Message) {
        let event: &dyn Any = &*message.event;
        for handler in handlers.handlers(message.kind) {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::AcqRel);
                }
                Err(payload) => {
                    log::error!(
                        "Message bus '{}': handler panicked: {}",
                        self.name,
                        panic_message(&*payload)
                    );
                    self.failed.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
    }

    /// One processing cycle. Returns `false` if there was nothing to do.
    fn drain(
        &self,
        queue: &Receiver<Envelope>,
        handlers: &mut HandlerMap,
        flushes: &mut Vec<BinarySemaphore>,
    ) -> bool {
        let mut processed = 0usize;

        while let Ok(envelope) = queue.try_recv() {
            processed += 1;
            match envelope {
                Envelope::Event(message) => self.deliver(handlers, &message),
                Envelope::Subscribe { kind, id, callback } => {
                    handlers.insert(kind, id, callback);
                }
                Envelope::Unsubscribe(id) => {
                    if !handlers.remove(id) {
                        log::debug!(
                            "Message bus '{}': subscription {id} was already gone.",
                            self.name
                        );
                    }
                }
                Envelope::Flush(barrier) => flushes.push(barrier),
            }
        }

        while let Some(message) = CACHE.with(|cache| cache.borrow_mut().pop_front()) {
            processed += 1;
            self.deliver(handlers, &message);
        }

        for barrier in flushes.drain(..) {
            barrier.release();
        }

        if processed > 0 {
            log::trace!("Message bus '{}' processed {processed} item(s).", self.name);
        }
        processed > 0
    }

    fn run(&self, id: Identity) {
        let _affinity = affinity::bind(id);

        let (sender, queue) = flume::unbounded();
        if self.queue.publish(sender).is_err() {
            log::error!("Message bus '{}': queue published twice.", self.name);
            return;
        }
        log::debug!("Message bus '{}' ({id}) started.", self.name);

        let mut handlers = HandlerMap::default();
        let mut flushes = Vec::new();

        while !self.stop.load(Ordering::SeqCst) {
            if !self.drain(&queue, &mut handlers, &mut flushes) {
                self.resume.park_unless(|| {
                    !queue.is_empty() || self.stop.load(Ordering::SeqCst)
                });
            }
        }

        while self.posting.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
        while self.drain(&queue, &mut handlers, &mut flushes) {}

        log::debug!(
            "Message bus '{}' ({id}) stopped with {} subscription(s).",
            self.name,
            handlers.len()
        );
    }
}

/// A publish/subscribe bus with a dedicated delivery thread.
///
/// Handlers run on the bus thread, in subscription order, one event at a
/// time. Events of one publisher are delivered in publish order. A panicking
/// handler is logged and counted; delivery continues with the next handler.
///
/// Dropping the bus delivers everything already posted, then joins the thread.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use khora_threads::{AsyncBusConfig, AsyncMessageBus};
///
/// struct AssetLoaded { id: u32 }
///
/// let bus = AsyncMessageBus::new(AsyncBusConfig::default()).unwrap();
/// let loaded = Arc::new(AtomicU32::new(0));
/// let sink = Arc::clone(&loaded);
/// bus.subscribe(move |event: &AssetLoaded| {
///     sink.store(event.id, Ordering::SeqCst);
/// })
/// .unwrap();
///
/// bus.publish(AssetLoaded { id: 7 }).unwrap();
/// bus.flush().unwrap();
/// assert_eq!(loaded.load(Ordering::SeqCst), 7);
/// ```
pub struct AsyncMessageBus {
    shared: Registered<AsyncBusShared>,
    thread: Option<JoinHandle<()>>,
}

impl AsyncMessageBus {
    /// Spawns the bus thread.
    pub fn new(config: AsyncBusConfig) -> Result<Self, RuntimeError> {
        let shared = Registered::new(AsyncBusShared::new(config.name.clone()));
        let id = shared.id();
        let thread_shared = Arc::clone(shared.shared());

        let thread = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || thread_shared.run(id))
            .map_err(|source| RuntimeError::Spawn {
                name: config.name,
                source,
            })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Registers `handler` for events of type `E`.
    ///
    /// The subscription takes effect on the bus thread, before any event
    /// posted after this call returns.
    pub fn subscribe<E, F>(&self, handler: F) -> Result<SubscriptionId, RuntimeError>
    where
        E: Any,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(
            self.shared
                .next_subscription
                .fetch_add(1, Ordering::Relaxed),
        );
        self.shared.post(Envelope::Subscribe {
            kind: TypeId::of::<E>(),
            id,
            callback: erase(handler),
        })?;
        Ok(id)
    }

    /// Removes a subscription once the bus thread reaches the request.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RuntimeError> {
        self.shared.post(Envelope::Unsubscribe(id))
    }

    /// Posts `event` for delivery.
    ///
    /// From a handler running on this bus's thread the event is cached and
    /// delivered after the current queue batch.
    pub fn publish<E: Any + Send>(&self, event: E) -> Result<(), RuntimeError> {
        let message = Message {
            kind: TypeId::of::<E>(),
            event: Box::new(event),
        };

        if affinity::is_bound_to(self.shared.id()) {
            CACHE.with(|cache| cache.borrow_mut().push_back(message));
            return Ok(());
        }
        self.shared.post(Envelope::Event(message))
    }

    /// Blocks until everything posted before this call has been delivered,
    /// including events those handlers published in turn.
    pub fn flush(&self) -> Result<(), RuntimeError> {
        if affinity::is_bound_to(self.shared.id()) {
            return Err(RuntimeError::WouldDeadlock {
                operation: "AsyncMessageBus::flush",
            });
        }

        let barrier = BinarySemaphore::new();
        self.shared.post(Envelope::Flush(barrier.clone()))?;
        barrier.acquire();
        Ok(())
    }

    /// Wakes the bus thread if it is parked.
    pub fn notify(&self) {
        self.shared.resume.notify();
    }

    /// Asks the bus thread to deliver what it has accepted and exit.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    /// Returns `true` once a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// The bus's registry identity.
    pub fn id(&self) -> Identity {
        self.shared.id()
    }

    /// Delivery counters.
    pub fn stats(&self) -> AsyncBusStats {
        AsyncBusStats {
            delivered: self.shared.delivered.load(Ordering::Acquire),
            failed: self.shared.failed.load(Ordering::Acquire),
        }
    }
}

impl Drop for AsyncMessageBus {
    fn drop(&mut self) {
        self.shared.request_stop();

        let Some(thread) = self.thread.take() else {
            return;
        };
        if affinity::is_bound_to(self.shared.id()) {
            log::warn!(
                "Message bus '{}' dropped from its own thread; detaching instead of joining.",
                self.shared.name
            );
            return;
        }
        if thread.join().is_err() {
            log::error!("Message bus '{}' thread panicked.", self.shared.name);
        }
    }
}

impl fmt::Debug for AsyncMessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMessageBus")
            .field("id", &self.shared.id())
            .field("name", &self.shared.name)
            .field("stats", &self.stats())
            .finish()
    }
}
