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

//! Which registered owner the current thread belongs to.
//!
//! Every owner thread binds itself to its owner's [`Identity`] when it starts.
//! Code running on that thread (a task, a message handler) can then find its
//! owner through the registry without ever holding a pointer to it, and an
//! owner can tell whether a call originates from its own thread.

use std::cell::Cell;
use std::marker::PhantomData;

use crate::identity::Identity;

thread_local! {
    static OWNER: Cell<Identity> = const { Cell::new(Identity::INVALID) };
}

/// Restores the previous binding when dropped.
#[derive(Debug)]
#[must_use = "the binding is undone when the guard is dropped"]
pub struct AffinityGuard {
    previous: Identity,
    // Bindings are per-thread; the guard must be dropped where it was made.
    _not_send: PhantomData<*const ()>,
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        OWNER.with(|owner| owner.set(self.previous));
    }
}

/// Binds the current thread to `owner` until the guard is dropped.
pub fn bind(owner: Identity) -> AffinityGuard {
    let previous = OWNER.with(|slot| slot.replace(owner));
    AffinityGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// The owner the current thread is bound to, if any.
pub fn current() -> Option<Identity> {
    let owner = OWNER.with(Cell::get);
    owner.is_valid().then_some(owner)
}

/// Returns `true` if the current thread is bound to `owner`.
pub fn is_bound_to(owner: Identity) -> bool {
    owner.is_valid() && current() == Some(owner)
}
