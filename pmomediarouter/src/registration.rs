//! Observer registrations.
//!
//! A [`Registration`] is handed back by [`crate::MediaRouter::add_observer`].
//! While it is alive, the observer receives every sink, route, message and
//! state notification of the manager, translated into the public wrapper
//! types. Dropping it removes the observer from the manager, unless the
//! manager has already been destroyed, in which case dropping is a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::backend::{RouteMessage, RouteRecord, SinkRecord, StateChangeInfo};
use crate::context::ContextState;
use crate::dispatch::ContextHandle;
use crate::model::ConnectionState;
use crate::route::MediaRoute;
use crate::sink::MediaSink;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Receives media router notifications.
///
/// Methods are called on the router thread. Calling back into the router
/// from an observer is allowed: every router operation is queued.
pub trait MediaObserver: Send + Sync {
    /// The list of available sinks has changed or a refresh was requested.
    fn on_sinks(&self, sinks: Vec<MediaSink>);

    /// The list of available routes has changed or a refresh was requested.
    fn on_routes(&self, routes: Vec<MediaRoute>);

    fn on_route_state_changed(&self, route: MediaRoute, state: ConnectionState);

    /// A message arrived on `route`. Text messages are passed as UTF-8 bytes.
    fn on_route_message_received(&self, route: MediaRoute, message: &[u8]);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ObserverId(pub(crate) u64);

/// Internal observer interface of the manager, fed with engine records.
pub(crate) trait ManagerObserver: Send + Sync {
    fn observer_id(&self) -> ObserverId;
    fn on_media_router_destroyed(&self);
    fn on_media_sinks(&self, sinks: &[SinkRecord]);
    fn on_media_routes(&self, routes: &[RouteRecord]);
    fn on_media_route_messages(&self, route: &RouteRecord, messages: &[RouteMessage]);
    fn on_media_route_state_change(&self, route: &RouteRecord, info: &StateChangeInfo);
}

#[derive(Debug)]
enum Binding {
    /// Waiting for the router to be initialized.
    Pending,
    /// Registered with the manager of this context.
    Active(ContextHandle),
    /// The handle was dropped before registration happened.
    Released,
    /// The manager was destroyed; nothing left to unregister from.
    Detached,
}

pub(crate) struct RegistrationInner {
    id: ObserverId,
    observer: Arc<dyn MediaObserver>,
    binding: Mutex<Binding>,
}

impl RegistrationInner {
    fn binding(&self) -> MutexGuard<'_, Binding> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context(&self) -> Option<ContextHandle> {
        match &*self.binding() {
            Binding::Active(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Registers with the manager. Runs on the router thread.
    pub(crate) fn initialize(self: &Arc<Self>, state: &mut ContextState) {
        {
            let mut binding = self.binding();
            match *binding {
                Binding::Pending => *binding = Binding::Active(state.handle().clone()),
                _ => {
                    debug!(observer = self.id.0, "Registration released before initialization");
                    return;
                }
            }
        }
        let observer: Arc<dyn ManagerObserver> = Arc::clone(self) as Arc<dyn ManagerObserver>;
        state.media_router_manager().add_observer(observer);
    }
}

impl ManagerObserver for RegistrationInner {
    fn observer_id(&self) -> ObserverId {
        self.id
    }

    fn on_media_router_destroyed(&self) {
        *self.binding() = Binding::Detached;
    }

    fn on_media_sinks(&self, sinks: &[SinkRecord]) {
        let Some(context) = self.context() else {
            return;
        };
        let sinks = sinks
            .iter()
            .map(|s| MediaSink::with_context(s.clone(), context.clone()))
            .collect();
        self.observer.on_sinks(sinks);
    }

    fn on_media_routes(&self, routes: &[RouteRecord]) {
        let Some(context) = self.context() else {
            return;
        };
        let routes = routes
            .iter()
            .map(|r| MediaRoute::new(r.clone(), context.clone()))
            .collect();
        self.observer.on_routes(routes);
    }

    fn on_media_route_messages(&self, route: &RouteRecord, messages: &[RouteMessage]) {
        let Some(context) = self.context() else {
            return;
        };
        let route = MediaRoute::new(route.clone(), context);
        for payload in messages.iter().filter_map(RouteMessage::payload) {
            self.observer.on_route_message_received(route.clone(), payload);
        }
    }

    fn on_media_route_state_change(&self, route: &RouteRecord, info: &StateChangeInfo) {
        let Some(context) = self.context() else {
            return;
        };
        self.observer.on_route_state_changed(
            MediaRoute::new(route.clone(), context),
            info.connection_state(),
        );
    }
}

/// Keeps an observer registered. Drop it to stop notifications.
pub struct Registration {
    inner: Arc<RegistrationInner>,
}

impl Registration {
    pub(crate) fn new(observer: Arc<dyn MediaObserver>) -> Self {
        let id = ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(RegistrationInner {
                id,
                observer,
                binding: Mutex::new(Binding::Pending),
            }),
        }
    }

    pub(crate) fn inner(&self) -> Arc<RegistrationInner> {
        Arc::clone(&self.inner)
    }

    /// True while the observer is registered with a live manager.
    pub fn is_registered(&self) -> bool {
        matches!(*self.inner.binding(), Binding::Active(_))
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let previous = {
            let mut binding = self.inner.binding();
            match *binding {
                Binding::Pending | Binding::Active(_) => {
                    std::mem::replace(&mut *binding, Binding::Released)
                }
                // Le manager est déjà détruit ou rien n'a été enregistré.
                Binding::Released | Binding::Detached => return,
            }
        };

        if let Binding::Active(handle) = previous {
            let id = self.inner.id;
            handle.post(move |state| {
                if let Some(manager) = state.and_then(|s| s.existing_manager()) {
                    manager.remove_observer(id);
                }
            });
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.inner.id.0)
            .field("binding", &*self.inner.binding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RouteMessage;
    use crate::loopback::LoopbackBackend;
    use crate::model::{ProviderKind, SinkDeviceInfo};
    use crate::router::MediaRouter;
    use crate::sink::MediaSink;
    use crate::test_support::{Event, RecordingObserver, WAIT, context, on_router};
    use crossbeam_channel::unbounded;

    fn three_sinks() -> Vec<SinkRecord> {
        vec![
            SinkRecord::new("a", "Salon", ProviderKind::Cast),
            SinkRecord::new("b", "Cuisine", ProviderKind::Cast),
            SinkRecord::new("c", "Bureau", ProviderKind::Dial),
        ]
    }

    fn route(id: &str, sink_id: &str) -> RouteRecord {
        RouteRecord {
            route_id: id.to_string(),
            source_id: "cast:233637DE".to_string(),
            sink_id: sink_id.to_string(),
            sink_name: "Salon".to_string(),
        }
    }

    fn observer_count(handle: &ContextHandle) -> usize {
        on_router(handle, |s| s.media_router_manager().observer_count())
    }

    #[test]
    fn test_each_observer_gets_one_snapshot() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();
        let (first, first_events) = RecordingObserver::new();
        let (second, second_events) = RecordingObserver::new();
        let _r1 = router.add_observer(first);
        let _r2 = router.add_observer(second);
        assert_eq!(observer_count(&ctx.handle()), 2);

        backend.push_sinks(three_sinks());
        let expected = Event::Sinks(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(first_events.recv_timeout(WAIT).unwrap(), expected);
        assert_eq!(second_events.recv_timeout(WAIT).unwrap(), expected);

        on_router(&ctx.handle(), |_| ());
        assert!(first_events.try_recv().is_err());
        assert!(second_events.try_recv().is_err());
    }

    #[test]
    fn test_each_observer_gets_one_route_snapshot() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();
        let (first, first_events) = RecordingObserver::new();
        let (second, second_events) = RecordingObserver::new();
        let _r1 = router.add_observer(first);
        let _r2 = router.add_observer(second);
        assert_eq!(observer_count(&ctx.handle()), 2);

        backend.push_routes(vec![route("r1", "a"), route("r2", "b")]);
        let expected = Event::Routes(vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(first_events.recv_timeout(WAIT).unwrap(), expected);
        assert_eq!(second_events.recv_timeout(WAIT).unwrap(), expected);

        // Replayed from the aggregated snapshot, not fetched again.
        router.notify_current_routes();
        assert_eq!(first_events.recv_timeout(WAIT).unwrap(), expected);
        assert_eq!(second_events.recv_timeout(WAIT).unwrap(), expected);

        on_router(&ctx.handle(), |_| ());
        assert!(first_events.try_recv().is_err());
        assert!(second_events.try_recv().is_err());
    }

    #[test]
    fn test_drop_unregisters() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();
        let (observer, events) = RecordingObserver::new();
        let registration = router.add_observer(observer);
        assert_eq!(observer_count(&ctx.handle()), 1);
        assert!(registration.is_registered());

        drop(registration);
        assert_eq!(observer_count(&ctx.handle()), 0);

        backend.push_sinks(three_sinks());
        on_router(&ctx.handle(), |_| ());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_released_before_initialization() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let router = MediaRouter::new(ctx.handle());
        let (observer, _events) = RecordingObserver::new();
        drop(router.add_observer(observer));

        router.initialize(None);
        assert_eq!(observer_count(&ctx.handle()), 0);
    }

    #[test]
    fn test_drop_after_manager_destruction_is_noop() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();
        let (observer, _events) = RecordingObserver::new();
        let registration = router.add_observer(observer);
        assert_eq!(observer_count(&ctx.handle()), 1);

        ctx.shutdown();
        assert!(!registration.is_registered());
        drop(registration);
    }

    #[test]
    fn test_one_call_per_message_payload() {
        let backend = LoopbackBackend::new();
        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();
        let (observer, events) = RecordingObserver::new();
        let _registration = router.add_observer(observer);

        let source = router.get_source("cast:233637DE").unwrap();
        let sink = MediaSink::new(SinkRecord::new("a", "Salon", ProviderKind::Cast));
        let (tx, rx) = unbounded();
        router.create_route(Some(&source), Some(&sink), move |_, _, route| {
            tx.send(route).unwrap();
        });
        let route_id = rx.recv_timeout(WAIT).unwrap().unwrap().id().to_string();

        let delivered = backend.emit_messages(
            &route_id,
            vec![
                RouteMessage::text("hello"),
                RouteMessage::Binary(None),
                RouteMessage::binary(vec![1, 2, 3]),
            ],
        );
        assert_eq!(delivered, 1);

        let messages: Vec<Event> = events
            .iter()
            .filter(|e| matches!(e, Event::Message(..)))
            .take(2)
            .collect();
        assert_eq!(
            messages,
            vec![
                Event::Message(route_id.clone(), b"hello".to_vec()),
                Event::Message(route_id, vec![1, 2, 3]),
            ]
        );
        on_router(&ctx.handle(), |_| ());
        assert!(!events.try_iter().any(|e| matches!(e, Event::Message(..))));
    }

    #[test]
    fn test_observed_sinks_can_query_device_info() {
        struct SinkCollector(crossbeam_channel::Sender<Vec<MediaSink>>);
        impl MediaObserver for SinkCollector {
            fn on_sinks(&self, sinks: Vec<MediaSink>) {
                let _ = self.0.send(sinks);
            }
            fn on_routes(&self, _routes: Vec<MediaRoute>) {}
            fn on_route_state_changed(&self, _route: MediaRoute, _state: ConnectionState) {}
            fn on_route_message_received(&self, _route: MediaRoute, _message: &[u8]) {}
        }

        let backend = LoopbackBackend::new();
        let info = SinkDeviceInfo {
            ip_address: "192.168.1.20".to_string(),
            port: 8009,
            model_name: "Chromecast Audio".to_string(),
        };
        backend.set_device_info("a", info.clone());

        let ctx = context(&backend);
        let router = ctx.media_router(None).unwrap();
        let (tx, rx) = unbounded();
        let _registration = router.add_observer(Arc::new(SinkCollector(tx)));
        assert_eq!(observer_count(&ctx.handle()), 1);
        backend.push_sinks(three_sinks());

        let sinks = rx.recv_timeout(WAIT).unwrap();
        let (info_tx, info_rx) = unbounded();
        for sink in &sinks[..2] {
            let info_tx = info_tx.clone();
            sink.device_info(move |info| info_tx.send(info).unwrap());
        }
        assert_eq!(info_rx.recv_timeout(WAIT).unwrap(), info);
        assert_eq!(info_rx.recv_timeout(WAIT).unwrap(), SinkDeviceInfo::default());
    }
}
