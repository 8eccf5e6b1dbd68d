//! Helpers shared by the unit tests.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::config::MediaRouterConfig;
use crate::context::{ContextState, MediaRouterContext};
use crate::dispatch::ContextHandle;
use crate::loopback::LoopbackBackend;
use crate::model::ConnectionState;
use crate::registration::MediaObserver;
use crate::route::MediaRoute;
use crate::sink::MediaSink;

pub(crate) const WAIT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    Sinks(Vec<String>),
    Routes(Vec<String>),
    State(String, ConnectionState),
    Message(String, Vec<u8>),
}

pub(crate) struct RecordingObserver {
    events: Sender<Event>,
}

impl RecordingObserver {
    pub(crate) fn new() -> (Arc<Self>, Receiver<Event>) {
        let (tx, rx) = unbounded();
        (Arc::new(Self { events: tx }), rx)
    }
}

impl MediaObserver for RecordingObserver {
    fn on_sinks(&self, sinks: Vec<MediaSink>) {
        let ids = sinks.iter().map(|s| s.id().to_string()).collect();
        let _ = self.events.send(Event::Sinks(ids));
    }

    fn on_routes(&self, routes: Vec<MediaRoute>) {
        let ids = routes.iter().map(|r| r.id().to_string()).collect();
        let _ = self.events.send(Event::Routes(ids));
    }

    fn on_route_state_changed(&self, route: MediaRoute, state: ConnectionState) {
        let _ = self.events.send(Event::State(route.id().to_string(), state));
    }

    fn on_route_message_received(&self, route: MediaRoute, message: &[u8]) {
        let _ = self
            .events
            .send(Event::Message(route.id().to_string(), message.to_vec()));
    }
}

pub(crate) fn context(backend: &LoopbackBackend) -> MediaRouterContext {
    MediaRouterContext::new(Arc::new(backend.clone()), MediaRouterConfig::default()).unwrap()
}

/// Runs `f` on the router thread and waits for its result.
pub(crate) fn on_router<T, F>(handle: &ContextHandle, f: F) -> T
where
    F: FnOnce(&mut ContextState) -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = bounded(1);
    handle.post(move |state| {
        if let Some(state) = state {
            let _ = tx.send(f(state));
        }
    });
    rx.recv_timeout(WAIT).unwrap()
}
