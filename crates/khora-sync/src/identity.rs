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

//! Process-wide object identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// An integer that stands in for an object's address.
///
/// Identities are handed out by [`Identity::next`] from a single process-wide
/// counter and are never reused. The value `0` is reserved as
/// [`Identity::INVALID`] and is never registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identity(u64);

impl Identity {
    /// The reserved "unregistered" identity.
    pub const INVALID: Identity = Identity(0);

    /// Allocates a fresh identity.
    pub fn next() -> Self {
        Self(NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw integer value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns `true` unless this is [`Identity::INVALID`].
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn next_never_returns_invalid() {
        for _ in 0..64 {
            assert!(Identity::next().is_valid());
        }
        assert!(!Identity::INVALID.is_valid());
        assert_eq!(Identity::default(), Identity::INVALID);
    }

    #[test]
    fn identities_are_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| (0..500).map(|_| Identity::next()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("thread panicked") {
                assert!(seen.insert(id), "identity {id} handed out twice");
            }
        }
        assert_eq!(seen.len(), 8 * 500);
    }

    #[test]
    fn identities_increase() {
        let a = Identity::next();
        let b = Identity::next();
        assert!(b > a);
    }
}
