use std::collections::HashMap;

use tracing::debug;

use crate::channel::{ChannelId, RouteConnectionChannel};

struct RouteState {
    id: ChannelId,
    channel: RouteConnectionChannel,
}

/// Live channels, keyed by route id.
#[derive(Default)]
pub(crate) struct RouteStateStore {
    states: HashMap<String, RouteState>,
    next_id: u64,
}

impl RouteStateStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reserves the id of the next channel to be inserted.
    pub(crate) fn allocate_id(&mut self) -> ChannelId {
        self.next_id += 1;
        ChannelId(self.next_id)
    }

    /// Stores the channel of `route_id`, replacing any previous one.
    pub(crate) fn insert(&mut self, route_id: &str, id: ChannelId, channel: RouteConnectionChannel) {
        if self
            .states
            .insert(route_id.to_string(), RouteState { id, channel })
            .is_some()
        {
            debug!(route_id = %route_id, "Replaced existing route channel");
        }
    }

    pub(crate) fn get(&self, route_id: &str) -> Option<&RouteConnectionChannel> {
        self.states.get(route_id).map(|s| &s.channel)
    }

    pub(crate) fn channel_id(&self, route_id: &str) -> Option<ChannelId> {
        self.states.get(route_id).map(|s| s.id)
    }

    /// True if `id` is the current channel of `route_id`.
    pub(crate) fn is_current(&self, route_id: &str, id: ChannelId) -> bool {
        self.channel_id(route_id) == Some(id)
    }

    /// Removes the channel of `route_id` if it is still channel `id`.
    pub(crate) fn remove_if_current(&mut self, route_id: &str, id: ChannelId) -> bool {
        if self.is_current(route_id, id) {
            self.states.remove(route_id);
            debug!(route_id = %route_id, "Removed route channel");
            true
        } else {
            false
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Subscription;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_fallback(drops: &Arc<AtomicUsize>) -> RouteConnectionChannel {
        let a = Arc::clone(drops);
        let b = Arc::clone(drops);
        RouteConnectionChannel::fallback(
            Subscription::new(move || {
                a.fetch_add(1, Ordering::SeqCst);
            }),
            Subscription::new(move || {
                b.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_insert_get_remove() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut store = RouteStateStore::new();
        let id = store.allocate_id();
        store.insert("route-1", id, counted_fallback(&drops));

        assert_eq!(store.len(), 1);
        assert!(store.get("route-1").is_some());
        assert!(!store.get("route-1").unwrap().is_native());
        assert!(store.get("route-2").is_none());

        assert!(store.remove_if_current("route-1", id));
        assert!(!store.remove_if_current("route-1", id));
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stale_channel_id_does_not_remove_newer_channel() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut store = RouteStateStore::new();
        let old = store.allocate_id();
        store.insert("route-1", old, counted_fallback(&drops));
        let new = store.allocate_id();
        store.insert("route-1", new, counted_fallback(&drops));

        // the replaced channel is released
        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert!(!store.remove_if_current("route-1", old));
        assert!(store.is_current("route-1", new));
        assert!(store.remove_if_current("route-1", new));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_clear_releases_everything() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut store = RouteStateStore::new();
        for route in ["a", "b", "c"] {
            let id = store.allocate_id();
            store.insert(route, id, counted_fallback(&drops));
        }
        store.clear();
        assert_eq!(store.len(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 6);
    }
}
