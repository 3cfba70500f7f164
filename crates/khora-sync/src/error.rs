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

//! Errors reported by owner threads and their handles.

use thiserror::Error;

/// A request an owner thread could not accept.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The owner was asked to stop and rejects new work.
    #[error("{owner} has been asked to stop and no longer accepts work")]
    Stopped {
        /// What kind of owner rejected the request (e.g. `"worker"`).
        owner: &'static str,
    },
    /// The operating system refused to start the owner's thread.
    #[error("failed to spawn thread '{name}'")]
    Spawn {
        /// The requested thread name.
        name: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The call would block the thread that has to make progress for it to return.
    #[error("{operation} called from the owning thread would deadlock")]
    WouldDeadlock {
        /// The rejected operation.
        operation: &'static str,
    },
}

impl RuntimeError {
    /// Returns `true` for [`RuntimeError::Stopped`].
    pub fn is_stopped(&self) -> bool {
        matches!(self, RuntimeError::Stopped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_owner() {
        let err = RuntimeError::Stopped { owner: "worker" };
        assert!(err.is_stopped());
        assert_eq!(
            err.to_string(),
            "worker has been asked to stop and no longer accepts work"
        );
    }

    #[test]
    fn spawn_error_keeps_source() {
        use std::error::Error as _;

        let err = RuntimeError::Spawn {
            name: "khora-worker".to_string(),
            source: std::io::Error::other("out of threads"),
        };
        assert!(!err.is_stopped());
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("out of threads"));
    }
}
