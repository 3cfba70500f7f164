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

//! Typed publish/subscribe.
//!
//! Handlers subscribe to one concrete event type and receive every event of
//! exactly that type, in subscription order.
//!
//! - [`SyncMessageBus`] calls handlers inline on the publisher's thread.
//! - [`AsyncMessageBus`] owns a thread that drains a cross-thread queue, then
//!   the events its own handlers published while draining.

mod async_bus;
mod handlers;
mod sync_bus;

pub use self::async_bus::{AsyncBusStats, AsyncMessageBus};
pub use self::handlers::SubscriptionId;
pub use self::sync_bus::SyncMessageBus;
