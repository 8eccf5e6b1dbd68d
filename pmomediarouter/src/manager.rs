//! Route and observer bookkeeping for one context.
//!
//! The manager lives on the router thread. It aggregates sink and route
//! snapshots, creates a channel for every route it establishes, and fans each
//! engine event out to the registered observers. Callbacks from the engines
//! are re-posted to the router thread and only reach the manager if it still
//! exists.

use std::io;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::aggregator::{RouteAggregator, SinkAggregator};
use crate::backend::{
    MediaBackend, RouteConnection, RouteMessage, RouteProvider, RouteRecord, RouteRequest,
    RouteRequestResult, SinkRecord, StateChangeInfo,
};
use crate::channel::{self, ChannelId, PresentationConnection, RouteConnectionChannel};
use crate::config::RouterSettings;
use crate::dispatch::ContextHandle;
use crate::model::{RouteCreateResult, RouteRequestResultCode};
use crate::registration::{ManagerObserver, ObserverId};
use crate::route_state::RouteStateStore;

/// What the manager reports back once the provider has answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CreateRouteOutcome {
    pub(crate) code: RouteCreateResult,
    pub(crate) error: String,
    pub(crate) route: Option<RouteRecord>,
}

impl CreateRouteOutcome {
    pub(crate) fn failure(code: RouteCreateResult, error: &str) -> Self {
        Self {
            code,
            error: error.to_string(),
            route: None,
        }
    }
}

pub(crate) type CreateRouteResultCallback = Box<dyn FnOnce(CreateRouteOutcome) + Send>;

/// A CreateRoute request waiting for the provider.
///
/// The answer is always handled on the router thread. If the provider drops
/// the request without answering (for instance because it is being torn
/// down), the caller is told so instead of waiting forever.
struct PendingRoute {
    handle: ContextHandle,
    callback: Option<CreateRouteResultCallback>,
}

impl PendingRoute {
    fn complete(mut self, result: RouteRequestResult) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        self.handle
            .post(move |state| match state.and_then(|s| s.existing_manager()) {
                Some(manager) => manager.on_create_route(result, callback),
                None => callback(CreateRouteOutcome::failure(
                    RouteCreateResult::UnknownError,
                    "Context is not valid",
                )),
            });
    }
}

impl Drop for PendingRoute {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            warn!("Route request dropped by the provider without an answer");
            self.handle.post(move |_| {
                callback(CreateRouteOutcome::failure(
                    RouteCreateResult::UnknownError,
                    "Route request was dropped by the provider",
                ))
            });
        }
    }
}

pub(crate) struct MediaRouterManager {
    backend: Arc<dyn MediaBackend>,
    handle: ContextHandle,
    settings: RouterSettings,
    observers: Vec<Arc<dyn ManagerObserver>>,
    sinks: SinkAggregator,
    routes: RouteAggregator,
    route_states: RouteStateStore,
}

impl MediaRouterManager {
    pub(crate) fn new(
        backend: Arc<dyn MediaBackend>,
        handle: ContextHandle,
        settings: RouterSettings,
    ) -> Self {
        let provider = backend.route_provider();
        provider.on_user_gesture();

        // Une URL de présentation non vide est requise pour découvrir les
        // appareils Cast.
        let sinks = SinkAggregator::start(
            &*backend.sink_discovery(),
            &settings.discovery_presentation_url,
            handle.clone(),
        );
        let routes = RouteAggregator::start(&*provider, handle.clone());

        Self {
            backend,
            handle,
            settings,
            observers: Vec::new(),
            sinks,
            routes,
            route_states: RouteStateStore::new(),
        }
    }

    // Always fetched again: the backend may replace its provider at any time.
    fn route_provider(&self) -> Arc<dyn RouteProvider> {
        self.backend.route_provider()
    }

    pub(crate) fn add_observer(&mut self, observer: Arc<dyn ManagerObserver>) {
        let id = observer.observer_id();
        if self.observers.iter().any(|o| o.observer_id() == id) {
            return;
        }
        debug!(observer = id.0, "Observer added");
        self.observers.push(observer);
    }

    /// Idempotent.
    pub(crate) fn remove_observer(&mut self, id: ObserverId) {
        let before = self.observers.len();
        self.observers.retain(|o| o.observer_id() != id);
        if self.observers.len() != before {
            debug!(observer = id.0, "Observer removed");
        }
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn notify_current_sinks(&self) {
        for observer in &self.observers {
            observer.on_media_sinks(self.sinks.current());
        }
    }

    pub(crate) fn notify_current_routes(&self) {
        for observer in &self.observers {
            observer.on_media_routes(self.routes.current());
        }
    }

    pub(crate) fn on_sinks_updated(&mut self, sinks: Vec<SinkRecord>) {
        self.sinks.replace(sinks);
        self.notify_current_sinks();
    }

    pub(crate) fn on_routes_updated(&mut self, routes: Vec<RouteRecord>) {
        self.routes.replace(routes);
        self.notify_current_routes();
    }

    pub(crate) fn create_route(
        &mut self,
        source_id: &str,
        sink_id: &str,
        origin: &str,
        callback: CreateRouteResultCallback,
    ) {
        let request = RouteRequest {
            source_id: source_id.to_string(),
            sink_id: sink_id.to_string(),
            origin: origin.to_string(),
            timeout: self.settings.route_timeout(),
            incognito: self.settings.incognito,
        };
        debug!(source = %source_id, sink = %sink_id, "Requesting route");

        let pending = PendingRoute {
            handle: self.handle.clone(),
            callback: Some(callback),
        };
        self.route_provider()
            .create_route(request, Box::new(move |result| pending.complete(result)));
    }

    fn on_create_route(&mut self, result: RouteRequestResult, callback: CreateRouteResultCallback) {
        let RouteRequestResult {
            code,
            error,
            route,
            connection,
        } = result;

        let route = match (code, route) {
            (RouteRequestResultCode::Ok, Some(route)) => {
                self.create_route_state(&route, connection);
                Some(route)
            }
            _ => None,
        };

        callback(CreateRouteOutcome {
            code: code.into(),
            error,
            route,
        });
    }

    fn create_route_state(&mut self, route: &RouteRecord, connection: Option<RouteConnection>) {
        let id = self.route_states.allocate_id();
        let handle = self.handle.clone();
        self.open_channel(route, connection, id, move |route, connection| {
            PresentationConnection::open(route, connection, id, handle)
        });
    }

    /// Stores the channel of `route`. The native connection, when there is
    /// one, carries messages and state changes; the provider subscriptions
    /// are used otherwise, or if the native connection cannot be served.
    fn open_channel<F>(
        &mut self,
        route: &RouteRecord,
        connection: Option<RouteConnection>,
        id: ChannelId,
        open_native: F,
    ) where
        F: FnOnce(RouteRecord, RouteConnection) -> io::Result<PresentationConnection>,
    {
        let route_id = route.route_id.as_str();

        let native = match connection.map(|c| open_native(route.clone(), c)) {
            Some(Ok(connection)) => Some(connection),
            Some(Err(e)) => {
                warn!(route_id = %route_id, "Native connection unusable, using provider subscriptions: {}", e);
                None
            }
            None => None,
        };

        let channel = match native {
            Some(connection) => RouteConnectionChannel::Native(connection),
            None => self.fallback_channel(route, id),
        };

        debug!(
            route_id = %route_id,
            native = channel.is_native(),
            "Route channel created"
        );
        self.route_states.insert(route_id, id, channel);
    }

    fn fallback_channel(&self, route: &RouteRecord, id: ChannelId) -> RouteConnectionChannel {
        let provider = self.route_provider();

        let handle = self.handle.clone();
        let record = route.clone();
        let message_observer = provider.observe_route_messages(
            &route.route_id,
            Box::new(move |messages| channel::post_messages(&handle, record.clone(), messages)),
        );

        let handle = self.handle.clone();
        let record = route.clone();
        let state_subscription = provider.add_connection_state_callback(
            &route.route_id,
            Box::new(move |info| channel::post_state_change(&handle, id, record.clone(), info)),
        );

        RouteConnectionChannel::fallback(message_observer, state_subscription)
    }

    pub(crate) fn send_route_message(&self, route_id: &str, message: String) {
        // Must use the native connection if it exists.
        if let Some(connection) = self.route_states.get(route_id).and_then(|c| c.native()) {
            connection.send_route_message(message);
            return;
        }

        self.route_provider().send_route_message(route_id, message);
    }

    /// Forwards to the provider only. The channel goes away when the provider
    /// reports the terminal state.
    pub(crate) fn terminate_route(&self, route_id: &str) {
        if self.route_states.get(route_id).is_some() {
            debug!(route_id = %route_id, "Terminate requested, channel kept until terminal state");
        }
        self.route_provider().terminate_route(route_id);
    }

    /// Every state change reaches the observers. The channel is only removed
    /// on a terminal state reported by the channel currently held for the
    /// route, so a replaced channel never removes its successor.
    pub(crate) fn on_route_state_change(
        &mut self,
        channel_id: ChannelId,
        route: &RouteRecord,
        info: &StateChangeInfo,
    ) {
        for observer in &self.observers {
            observer.on_media_route_state_change(route, info);
        }

        if info.connection_state().is_terminal()
            && !self.route_states.remove_if_current(&route.route_id, channel_id)
        {
            debug!(route_id = %route.route_id, "Terminal state for a channel no longer held");
        }
    }

    pub(crate) fn on_messages_received(&self, route: &RouteRecord, messages: Vec<RouteMessage>) {
        for observer in &self.observers {
            observer.on_media_route_messages(route, &messages);
        }
    }

    /// Kind of channel currently held for `route_id`, if any.
    #[cfg(test)]
    pub(crate) fn channel_is_native(&self, route_id: &str) -> Option<bool> {
        self.route_states.get(route_id).map(|c| c.is_native())
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.route_states.len()
    }
}

impl Drop for MediaRouterManager {
    fn drop(&mut self) {
        let observers = std::mem::take(&mut self.observers);
        if !observers.is_empty() {
            debug!(count = observers.len(), "Notifying observers of manager destruction");
        }
        for observer in observers {
            observer.on_media_router_destroyed();
        }

        debug!(count = self.route_states.len(), "Releasing route channels");
        self.route_states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ConnectionEvent;
    use crate::loopback::{LoopbackBackend, LoopbackOutcome};
    use crate::model::{ConnectionState, ProviderKind};
    use crate::route::MediaRoute;
    use crate::router::MediaRouter;
    use crate::sink::MediaSink;
    use crate::test_support::{Event, RecordingObserver, WAIT, context, on_router};
    use crossbeam_channel::{Receiver, bounded, unbounded};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingObserver {
        id: ObserverId,
        destroyed: AtomicUsize,
        messages: AtomicUsize,
        states: AtomicUsize,
    }

    impl CountingObserver {
        fn new(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id: ObserverId(id),
                destroyed: AtomicUsize::new(0),
                messages: AtomicUsize::new(0),
                states: AtomicUsize::new(0),
            })
        }
    }

    impl ManagerObserver for CountingObserver {
        fn observer_id(&self) -> ObserverId {
            self.id
        }
        fn on_media_router_destroyed(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_media_sinks(&self, _sinks: &[SinkRecord]) {}
        fn on_media_routes(&self, _routes: &[RouteRecord]) {}
        fn on_media_route_messages(&self, _route: &RouteRecord, messages: &[RouteMessage]) {
            self.messages.fetch_add(messages.len(), Ordering::SeqCst);
        }
        fn on_media_route_state_change(&self, _route: &RouteRecord, _info: &StateChangeInfo) {
            self.states.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn create_cast_route(router: &MediaRouter) -> (RouteCreateResult, String, Option<MediaRoute>) {
        let source = router.get_source("cast:233637DE").unwrap();
        let sink = MediaSink::new(SinkRecord::new("tv", "Salon", ProviderKind::Cast));
        let (tx, rx) = bounded(1);
        router.create_route(Some(&source), Some(&sink), move |code, error, route| {
            tx.send((code, error, route)).unwrap();
        });
        rx.recv_timeout(WAIT).unwrap()
    }

    fn wait_for_state(events: &Receiver<Event>) -> Event {
        loop {
            let event = events.recv_timeout(WAIT).unwrap();
            if matches!(event, Event::State(..)) {
                return event;
            }
        }
    }

    #[test]
    fn test_manager_start_subscribes_to_engines() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let _router = ctx.media_router(None).unwrap();
        on_router(&ctx.handle(), |state| {
            state.media_router_manager();
        });
        assert_eq!(backend.user_gestures(), 1);
        assert_eq!(backend.active_subscriptions(), 2);

        ctx.shutdown();
        assert_eq!(backend.active_subscriptions(), 0);
    }

    #[test]
    fn test_fallback_channel_routes_messages_through_provider() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();

        let (code, error, route) = create_cast_route(&router);
        assert_eq!(code, RouteCreateResult::Ok);
        assert!(error.is_empty());
        let route = route.unwrap();
        let route_id = route.id().to_string();

        let probe = route_id.clone();
        let native = on_router(&ctx.handle(), move |s| {
            s.media_router_manager().channel_is_native(&probe)
        });
        assert_eq!(native, Some(false));
        assert_eq!(backend.route_subscriptions(&route_id), (1, 1));

        route.send_route_message("ping");
        on_router(&ctx.handle(), |_| ());
        assert_eq!(
            backend.generic_sends(),
            vec![(route_id.clone(), "ping".to_string())]
        );

        let request = &backend.requests()[0];
        assert_eq!(request.timeout, Duration::from_millis(5000));
        assert!(!request.incognito);
    }

    #[test]
    fn test_native_channel_excludes_fallback() {
        let backend = LoopbackBackend::new();
        backend.plan(LoopbackOutcome::ConnectedNative);
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();

        let route = create_cast_route(&router).2.unwrap();
        let route_id = route.id().to_string();

        let probe = route_id.clone();
        let native = on_router(&ctx.handle(), move |s| {
            s.media_router_manager().channel_is_native(&probe)
        });
        assert_eq!(native, Some(true));
        assert_eq!(backend.route_subscriptions(&route_id), (0, 0));

        route.send_route_message("ping");
        let end = backend.native_end(&route_id).unwrap();
        assert_eq!(end.outgoing.recv_timeout(WAIT).unwrap(), "ping");
        assert!(backend.generic_sends().is_empty());
    }

    #[test]
    fn test_native_events_reach_observers() {
        let backend = LoopbackBackend::new();
        backend.plan(LoopbackOutcome::ConnectedNative);
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();
        let (observer, events) = RecordingObserver::new();
        let _registration = router.add_observer(observer);

        let route = create_cast_route(&router).2.unwrap();
        let route_id = route.id().to_string();
        let end = backend.native_end(&route_id).unwrap();

        end.events
            .send(ConnectionEvent::Message("hello".to_string()))
            .unwrap();
        end.events
            .send(ConnectionEvent::StateChanged("connected".to_string()))
            .unwrap();

        let mut message = None;
        let state = loop {
            match events.recv_timeout(WAIT).unwrap() {
                Event::Message(id, bytes) => message = Some((id, bytes)),
                event @ Event::State(..) => break event,
                _ => {}
            }
        };
        assert_eq!(message, Some((route_id.clone(), b"hello".to_vec())));
        assert_eq!(state, Event::State(route_id, ConnectionState::Connected));
    }

    #[test]
    fn test_terminal_state_is_delivered_before_cleanup() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();
        let (observer, events) = RecordingObserver::new();
        let _registration = router.add_observer(observer);

        let route = create_cast_route(&router).2.unwrap();
        let route_id = route.id().to_string();

        assert_eq!(backend.close(&route_id, "receiver left"), 1);
        assert_eq!(
            wait_for_state(&events),
            Event::State(route_id.clone(), ConnectionState::Closed)
        );

        let count = on_router(&ctx.handle(), |s| s.media_router_manager().channel_count());
        assert_eq!(count, 0);
        assert_eq!(backend.route_subscriptions(&route_id), (0, 0));

        // Sans canal, l'envoi passe par le provider.
        route.send_route_message("late");
        on_router(&ctx.handle(), |_| ());
        assert_eq!(backend.generic_sends(), vec![(route_id, "late".to_string())]);
    }

    #[test]
    fn test_terminate_keeps_channel_until_terminal_state() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();

        let route = create_cast_route(&router).2.unwrap();
        let route_id = route.id().to_string();

        let probe = route_id.clone();
        let count = on_router(&ctx.handle(), move |s| {
            let manager = s.media_router_manager();
            manager.terminate_route(&probe);
            // The provider reports the terminal state asynchronously.
            manager.channel_count()
        });
        assert_eq!(count, 1);

        let count = on_router(&ctx.handle(), |s| s.media_router_manager().channel_count());
        assert_eq!(count, 0);
        assert_eq!(backend.terminated(), vec![route_id]);
    }

    #[test]
    fn test_provider_error_is_passed_through() {
        let backend = LoopbackBackend::new();
        backend.plan(LoopbackOutcome::Fail(
            RouteRequestResultCode::SinkNotFound,
            "Sink went away".to_string(),
        ));
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();

        let (code, error, route) = create_cast_route(&router);
        assert_eq!(code, RouteCreateResult::SinkNotFound);
        assert_eq!(error, "Sink went away");
        assert!(route.is_none());

        let count = on_router(&ctx.handle(), |s| s.media_router_manager().channel_count());
        assert_eq!(count, 0);
    }

    #[test]
    fn test_replaced_channel_events_are_delivered_without_cleanup() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();
        let route = create_cast_route(&router).2.unwrap();
        let route_id = route.id().to_string();

        let observer = CountingObserver::new(u64::MAX);
        let counted = Arc::clone(&observer);
        let count = on_router(&ctx.handle(), move |s| {
            let manager = s.media_router_manager();
            manager.add_observer(counted);
            let record = RouteRecord {
                route_id,
                source_id: "cast:233637DE".to_string(),
                sink_id: "tv".to_string(),
                sink_name: "Salon".to_string(),
            };
            let replaced = ChannelId(u64::MAX);
            manager.on_messages_received(&record, vec![RouteMessage::text("x")]);
            manager.on_route_state_change(replaced, &record, &StateChangeInfo::closed("old session"));
            manager.channel_count()
        });

        assert_eq!(observer.messages.load(Ordering::SeqCst), 1);
        assert_eq!(observer.states.load(Ordering::SeqCst), 1);
        // The current channel survives a terminal state from another one.
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unanswered_request_still_completes() {
        let backend = LoopbackBackend::new();
        backend.plan(LoopbackOutcome::Unanswered);
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();

        let (code, error, route) = create_cast_route(&router);
        assert_eq!(code, RouteCreateResult::UnknownError);
        assert_eq!(error, "Route request was dropped by the provider");
        assert!(route.is_none());
        assert_eq!(backend.requests().len(), 1);

        let count = on_router(&ctx.handle(), |s| s.media_router_manager().channel_count());
        assert_eq!(count, 0);
    }

    #[test]
    fn test_unusable_native_connection_falls_back_to_provider() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let _router = ctx.media_router(None).unwrap();

        let (_events_tx, events_rx) = unbounded();
        let (outgoing_tx, _outgoing_rx) = unbounded();
        let connection = RouteConnection {
            events: events_rx,
            outgoing: outgoing_tx,
        };
        let record = RouteRecord {
            route_id: "route-1".to_string(),
            source_id: "cast:233637DE".to_string(),
            sink_id: "tv".to_string(),
            sink_name: "Salon".to_string(),
        };

        let native = on_router(&ctx.handle(), move |s| {
            let manager = s.media_router_manager();
            let id = manager.route_states.allocate_id();
            manager.open_channel(&record, Some(connection), id, |_, _| {
                Err(io::Error::other("no thread left"))
            });
            manager.channel_is_native("route-1")
        });
        assert_eq!(native, Some(false));
        assert_eq!(backend.route_subscriptions("route-1"), (1, 1));
    }

    #[test]
    fn test_destruction_notifies_each_observer_once() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let first = CountingObserver::new(u64::MAX - 1);
        let second = CountingObserver::new(u64::MAX - 2);

        let (a, b) = (Arc::clone(&first), Arc::clone(&second));
        let count = on_router(&ctx.handle(), move |s| {
            let manager = s.media_router_manager();
            manager.add_observer(a.clone());
            manager.add_observer(a);
            manager.add_observer(b);
            manager.observer_count()
        });
        assert_eq!(count, 2);

        ctx.shutdown();
        ctx.shutdown();
        assert_eq!(first.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(second.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_observer_is_idempotent() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let observer = CountingObserver::new(u64::MAX - 3);
        let count = on_router(&ctx.handle(), move |s| {
            let manager = s.media_router_manager();
            manager.add_observer(observer);
            manager.remove_observer(ObserverId(u64::MAX - 3));
            manager.remove_observer(ObserverId(u64::MAX - 3));
            manager.observer_count()
        });
        assert_eq!(count, 0);
    }
}
