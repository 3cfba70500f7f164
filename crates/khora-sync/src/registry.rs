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

//! A process-wide identity table for objects that are referenced across threads.
//!
//! The [`ObjectRegistry`] lets one object refer to another by [`Identity`]
//! instead of by pointer. Entries hold [`Weak`] references, so a lookup either
//! yields a live `Arc` or nothing at all; it can never observe a freed object.
//!
//! # Design
//!
//! All reads go through the shared side of a single `RwLock`, all writes
//! through the exclusive side. [`ObjectRegistry::unregister`] only removes an
//! entry when it still points at the caller's allocation, so an owner being
//! torn down cannot erase an entry that has since been repointed elsewhere.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, Weak};

use crate::identity::Identity;

type Entry = Weak<dyn Any + Send + Sync>;

static GLOBAL: OnceLock<ObjectRegistry> = OnceLock::new();

/// Maps [`Identity`] values to live objects.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use khora_sync::{Identity, ObjectRegistry};
///
/// let registry = ObjectRegistry::new();
/// let id = Identity::next();
/// let texture_cache = Arc::new(String::from("texture cache"));
///
/// registry.register(id, &texture_cache);
/// assert_eq!(registry.query::<String>(id).as_deref(), Some(&*texture_cache));
///
/// registry.unregister(id, &texture_cache);
/// assert!(registry.query::<String>(id).is_none());
/// ```
#[derive(Default)]
pub struct ObjectRegistry {
    table: RwLock<HashMap<Identity, Entry>>,
}

impl ObjectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the process-wide registry.
    pub fn global() -> &'static ObjectRegistry {
        GLOBAL.get_or_init(ObjectRegistry::new)
    }

    /// Maps `id` to `object`. The last write for an identity wins.
    ///
    /// Returns `true` if the identity was vacant (or only held a dead entry),
    /// `false` if a live entry was displaced or `id` is [`Identity::INVALID`],
    /// in which case nothing is inserted.
    pub fn register<T: Any + Send + Sync>(&self, id: Identity, object: &Arc<T>) -> bool {
        if !id.is_valid() {
            log::warn!("Refusing to register an object under the invalid identity.");
            return false;
        }

        let entry: Entry = Arc::<T>::downgrade(object);
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        match table.insert(id, entry) {
            Some(previous) if previous.strong_count() > 0 => {
                log::debug!("Registry entry {id} repointed to a new object.");
                false
            }
            _ => true,
        }
    }

    /// Removes the entry for `id`, but only if it still refers to `object`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister<T: Any + Send + Sync>(&self, id: Identity, object: &Arc<T>) -> bool {
        if !id.is_valid() {
            return false;
        }

        let candidate: Entry = Arc::<T>::downgrade(object);
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        match table.get(&id) {
            Some(stored) if Weak::ptr_eq(stored, &candidate) => {
                table.remove(&id);
                true
            }
            Some(_) => {
                log::trace!("Registry entry {id} belongs to another object, left in place.");
                false
            }
            None => false,
        }
    }

    /// Resolves `id` to a live object of type `T`.
    ///
    /// Returns `None` if the identity is unknown, its object has been dropped,
    /// or the object is not a `T`. None of these are errors: the caller must
    /// treat the target as gone.
    #[must_use]
    pub fn query<T: Any + Send + Sync>(&self, id: Identity) -> Option<Arc<T>> {
        self.query_any(id)?.downcast::<T>().ok()
    }

    /// Resolves `id` without a type check.
    #[must_use]
    pub fn query_any(&self, id: Identity) -> Option<Arc<dyn Any + Send + Sync>> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.get(&id).and_then(Weak::upgrade)
    }

    /// Returns `true` if `id` currently resolves to a live object.
    #[must_use]
    pub fn contains(&self, id: Identity) -> bool {
        self.query_any(id).is_some()
    }

    /// Returns the number of entries, dead ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if the registry holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

/// A pointer-free reference to an object in the global registry.
///
/// Holding a handle never keeps the target alive. [`WeakHandle::resolve`]
/// returns `None` once the target has been dropped or unregistered.
pub struct WeakHandle<T> {
    id: Identity,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> WeakHandle<T> {
    /// Creates a handle for `id`. The identity need not be registered yet.
    pub const fn new(id: Identity) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// A handle that never resolves.
    pub const fn invalid() -> Self {
        Self::new(Identity::INVALID)
    }

    /// The identity this handle refers to.
    pub fn id(&self) -> Identity {
        self.id
    }

    /// Looks the target up in the global registry.
    pub fn resolve(&self) -> Option<Arc<T>> {
        self.resolve_in(ObjectRegistry::global())
    }

    /// Looks the target up in a specific registry.
    pub fn resolve_in(&self, registry: &ObjectRegistry) -> Option<Arc<T>> {
        registry.query::<T>(self.id)
    }

    /// Returns `true` if the target currently resolves.
    pub fn is_alive(&self) -> bool {
        self.resolve().is_some()
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for WeakHandle<T> {}

impl<T> PartialEq for WeakHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for WeakHandle<T> {}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakHandle").field(&self.id).finish()
    }
}

/// An object that is registered in the global registry for as long as this value lives.
///
/// Construction allocates a fresh [`Identity`] and registers the object;
/// dropping unregisters it, guarded so that an entry already repointed by
/// [`Registered::replace`] is left alone.
pub struct Registered<T: Any + Send + Sync> {
    id: Identity,
    object: Arc<T>,
}

impl<T: Any + Send + Sync> Registered<T> {
    /// Wraps `value` in an `Arc` and registers it under a new identity.
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Registers an existing shared object under a new identity.
    pub fn from_arc(object: Arc<T>) -> Self {
        let id = Identity::next();
        ObjectRegistry::global().register(id, &object);
        Self { id, object }
    }

    /// This object's identity.
    pub fn id(&self) -> Identity {
        self.id
    }

    /// A weak, pointer-free handle to this object.
    pub fn handle(&self) -> WeakHandle<T> {
        WeakHandle::new(self.id)
    }

    /// The shared object.
    pub fn shared(&self) -> &Arc<T> {
        &self.object
    }

    /// Patches the registry entry in place so the identity refers to `object`.
    ///
    /// Returns the previously registered object; dropping it will not touch
    /// the entry.
    pub fn replace(&mut self, object: Arc<T>) -> Arc<T> {
        ObjectRegistry::global().register(self.id, &object);
        std::mem::replace(&mut self.object, object)
    }
}

impl<T: Any + Send + Sync> Deref for Registered<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl<T: Any + Send + Sync> Drop for Registered<T> {
    fn drop(&mut self) {
        ObjectRegistry::global().unregister(self.id, &self.object);
    }
}

impl<T: Any + Send + Sync> fmt::Debug for Registered<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registered").field("id", &self.id).finish()
    }
}
