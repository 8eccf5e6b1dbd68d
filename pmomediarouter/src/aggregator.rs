//! Snapshot caches fed by the engines.
//!
//! Each aggregator subscribes once when it is built. Every update pushed by
//! the engine is re-posted to the router thread, where it replaces the
//! snapshot as a whole and triggers one fan-out pass.

use tracing::debug;

use crate::backend::{RouteProvider, RouteRecord, SinkDiscovery, SinkRecord, Subscription};
use crate::dispatch::ContextHandle;

pub(crate) struct SnapshotAggregator<T> {
    snapshot: Vec<T>,
    _subscription: Subscription,
}

pub(crate) type SinkAggregator = SnapshotAggregator<SinkRecord>;
pub(crate) type RouteAggregator = SnapshotAggregator<RouteRecord>;

impl<T> SnapshotAggregator<T> {
    fn with_subscription(subscription: Subscription) -> Self {
        Self {
            snapshot: Vec::new(),
            _subscription: subscription,
        }
    }

    pub(crate) fn current(&self) -> &[T] {
        &self.snapshot
    }

    pub(crate) fn replace(&mut self, snapshot: Vec<T>) {
        self.snapshot = snapshot;
    }
}

impl SnapshotAggregator<SinkRecord> {
    pub(crate) fn start(
        discovery: &dyn SinkDiscovery,
        presentation_url: &str,
        handle: ContextHandle,
    ) -> Self {
        let subscription = discovery.observe_sinks(
            presentation_url,
            Box::new(move |sinks| {
                debug!(count = sinks.len(), "Sink snapshot received");
                handle.post(move |state| {
                    if let Some(manager) = state.and_then(|s| s.existing_manager()) {
                        manager.on_sinks_updated(sinks);
                    }
                });
            }),
        );
        Self::with_subscription(subscription)
    }
}

impl SnapshotAggregator<RouteRecord> {
    pub(crate) fn start(provider: &dyn RouteProvider, handle: ContextHandle) -> Self {
        let subscription = provider.observe_routes(Box::new(move |routes| {
            debug!(count = routes.len(), "Route snapshot received");
            handle.post(move |state| {
                if let Some(manager) = state.and_then(|s| s.existing_manager()) {
                    manager.on_routes_updated(routes);
                }
            });
        }));
        Self::with_subscription(subscription)
    }
}
