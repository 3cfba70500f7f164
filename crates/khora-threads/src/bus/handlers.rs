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
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Identifies one subscription on a bus.
///
/// Ids increase with subscription order, which is also dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    /// The raw value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

/// A type-erased handler; ignores events of other types.
pub(crate) type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

pub(crate) fn erase<E, F>(handler: F) -> Callback
where
    E: Any,
    F: Fn(&E) + Send + Sync + 'static,
{
    Arc::new(move |event: &dyn Any| {
        if let Some(event) = event.downcast_ref::<E>() {
            handler(event);
        }
    })
}

/// Event type → subscriptions in subscription order.
#[derive(Clone, Default)]
pub(crate) struct HandlerMap {
    by_type: HashMap<TypeId, BTreeMap<SubscriptionId, Callback>>,
    owners: HashMap<SubscriptionId, TypeId>,
}

impl HandlerMap {
    pub(crate) fn insert(&mut self, event_type: TypeId, id: SubscriptionId, callback: Callback) {
        self.by_type
            .entry(event_type)
            .or_default()
            .insert(id, callback);
        self.owners.insert(id, event_type);
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(event_type) = self.owners.remove(&id) else {
            return false;
        };
        if let Some(subscriptions) = self.by_type.get_mut(&event_type) {
            subscriptions.remove(&id);
            if subscriptions.is_empty() {
                self.by_type.remove(&event_type);
            }
        }
        true
    }

    /// Handlers for `event_type`, in subscription order.
    pub(crate) fn handlers(&self, event_type: TypeId) -> impl Iterator<Item = &Callback> {
        self.by_type
            .get(&event_type)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    pub(crate) fn count(&self, event_type: TypeId) -> usize {
        self.by_type.get(&event_type).map_or(0, BTreeMap::len)
    }

    pub(crate) fn len(&self) -> usize {
        self.owners.len()
    }
}

impl fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMap")
            .field("event_types", &self.by_type.len())
            .field("subscriptions", &self.owners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    struct Resized(u32);

    #[test]
    fn handlers_follow_subscription_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut map = HandlerMap::default();

        for id in [3, 1, 2] {
            let calls = Arc::clone(&calls);
            map.insert(
                TypeId::of::<Resized>(),
                SubscriptionId(id),
                erase(move |_: &Resized| calls.lock().unwrap().push(id)),
            );
        }

        for handler in map.handlers(TypeId::of::<Resized>()) {
            handler(&Resized(1));
        }
        assert_eq!(*calls.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn remove_cleans_up_empty_types() {
        let mut map = HandlerMap::default();
        map.insert(TypeId::of::<Resized>(), SubscriptionId(0), erase(|_: &Resized| {}));
        assert_eq!(map.count(TypeId::of::<Resized>()), 1);

        assert!(map.remove(SubscriptionId(0)));
        assert!(!map.remove(SubscriptionId(0)));
        assert_eq!(map.count(TypeId::of::<Resized>()), 0);
        assert_eq!(map.len(), 0);
        assert_eq!(map.handlers(TypeId::of::<Resized>()).count(), 0);
    }

    #[test]
    fn erased_handler_ignores_other_types() {
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let callback = erase(move |_: &Resized| *counter.lock().unwrap() += 1);

        callback(&Resized(2));
        callback(&"not a resize");
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
