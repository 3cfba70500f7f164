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

//! Integration tests for the identity registry under concurrent use.

use std::sync::Arc;
use std::thread;

use khora_sync::{Identity, ObjectRegistry, Registered, WeakHandle};

struct MeshCache {
    meshes: usize,
}

#[test]
fn test_round_trip_until_unregister() {
    let registry = ObjectRegistry::global();
    let id = Identity::next();
    let cache = Arc::new(MeshCache { meshes: 3 });

    registry.register(id, &cache);
    for _ in 0..3 {
        let resolved = registry.query::<MeshCache>(id).expect("entry must resolve");
        assert!(Arc::ptr_eq(&resolved, &cache));
    }

    assert!(registry.unregister(id, &cache));
    assert!(registry.query::<MeshCache>(id).is_none());
}

#[test]
fn test_handles_resolve_from_other_threads() {
    let registered = Registered::new(MeshCache { meshes: 12 });
    let handle = registered.handle();

    let readers: Vec<_> = (0..8)
        .map(|_| thread::spawn(move || handle.resolve().map(|cache| cache.meshes)))
        .collect();
    for reader in readers {
        assert_eq!(reader.join().expect("reader panicked"), Some(12));
    }

    drop(registered);
    let after = thread::spawn(move || handle.resolve().is_none())
        .join()
        .expect("reader panicked");
    assert!(after);
}

#[test]
fn test_concurrent_registration_and_teardown() {
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            thread::spawn(move || {
                let mut seen = Vec::new();
                for round in 0..200 {
                    let registered = Registered::new(MeshCache {
                        meshes: worker * 1_000 + round,
                    });
                    let handle: WeakHandle<MeshCache> = registered.handle();
                    seen.push(handle.resolve().map(|c| c.meshes));
                    drop(registered);
                    assert!(handle.resolve().is_none());
                }
                seen
            })
        })
        .collect();

    for (worker, handle) in handles.into_iter().enumerate() {
        let seen = handle.join().expect("thread panicked");
        for (round, meshes) in seen.into_iter().enumerate() {
            assert_eq!(meshes, Some(worker * 1_000 + round));
        }
    }
}

#[test]
fn test_teardown_racing_a_move_keeps_new_owner() {
    let registry = ObjectRegistry::global();
    let id = Identity::next();
    let moved_from = Arc::new(MeshCache { meshes: 1 });
    let moved_to = Arc::new(MeshCache { meshes: 2 });

    registry.register(id, &moved_from);
    registry.register(id, &moved_to);

    let stale = {
        let moved_from = Arc::clone(&moved_from);
        thread::spawn(move || ObjectRegistry::global().unregister(id, &moved_from))
    };
    assert!(!stale.join().expect("unregister panicked"));
    assert_eq!(
        registry.query::<MeshCache>(id).map(|c| c.meshes),
        Some(2)
    );
    assert!(registry.unregister(id, &moved_to));
}
