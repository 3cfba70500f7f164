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

//! # Khora Threads
//!
//! Long-lived engine services that each own one OS thread.
//!
//! - [`Worker`]: runs submitted tasks in FIFO order on its own thread.
//! - [`Scheduler`]: joins fan-out work and hands each continuation to a
//!   randomly chosen worker once every unit of its group has completed.
//! - [`SyncMessageBus`] / [`AsyncMessageBus`]: typed publish/subscribe, either
//!   inline on the publisher's thread or on a dedicated bus thread.
//!
//! Every owner builds its working set (queue, group map, handler table) on
//! its own thread and exposes it through the handshake primitives of
//! [`khora_sync`]. Owners are ordinary movable values: their threads only ever
//! talk to shared state and channels, never to the owner's address.

#![warn(missing_docs)]

pub mod bus;
pub mod config;
pub mod scheduler;
pub mod worker;

mod panic;

pub use bus::{AsyncBusStats, AsyncMessageBus, SubscriptionId, SyncMessageBus};
pub use config::{AsyncBusConfig, ConfigError, RuntimeConfig, SchedulerConfig, WorkerConfig};
pub use khora_sync::{Identity, RuntimeError};
pub use scheduler::{GroupId, Scheduler, SchedulerError, SchedulerHandle};
pub use worker::{Worker, WorkerHandle, WorkerStats};
