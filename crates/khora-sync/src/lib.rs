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

//! # Khora Sync
//!
//! Leaf primitives of the engine's thread-affine runtime.
//!
//! Long-lived engine objects (workers, schedulers, message buses) each own a
//! dedicated OS thread. The types in this crate let other threads reach them
//! without holding pointers into them:
//!
//! - [`ObjectRegistry`] maps integer [`Identity`] values to live objects and
//!   hands out [`WeakHandle`]s that resolve to `None` once the target is gone.
//! - [`FairMutex`] is a FIFO ticket lock for places where ordering fairness matters.
//! - [`Publication`], [`BinarySemaphore`] and [`ResumeSlot`] implement the
//!   publish-then-wait handshake a thread uses to expose state it built locally.
//! - [`affinity`] records which registered owner the current thread belongs to.

#![warn(missing_docs)]

pub mod affinity;
pub mod error;
pub mod fair_mutex;
pub mod identity;
pub mod publication;
pub mod registry;
pub mod resume;
pub mod semaphore;

pub use error::RuntimeError;
pub use fair_mutex::{FairMutex, FairMutexGuard, RawFairMutex};
pub use identity::Identity;
pub use publication::Publication;
pub use registry::{ObjectRegistry, Registered, WeakHandle};
pub use resume::ResumeSlot;
pub use semaphore::BinarySemaphore;
