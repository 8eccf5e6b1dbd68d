//! In-process backend.
//!
//! [`LoopbackBackend`] plays both engines: it reports the sinks it is told
//! about, creates routes on demand and records everything the router asks
//! of it. It is used by the demo and the tests, and is handy for embedding
//! applications that want to exercise their observers without devices.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{
    ConnectionEvent, CreateRouteCallback, MediaBackend, MessagesCallback, RouteConnection,
    RouteMessage, RouteProvider, RouteRecord, RouteRequest, RouteRequestResult, RoutesCallback,
    SinkDiscovery, SinkRecord, SinksCallback, StateChangeInfo, StateChangedCallback, Subscription,
};
use crate::model::{RouteRequestResultCode, SinkDeviceInfo};

/// How the next CreateRoute request is answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopbackOutcome {
    /// Route created, messages go through the provider.
    Connected,
    /// Route created with a native connection.
    ConnectedNative,
    Fail(RouteRequestResultCode, String),
    /// The request is dropped without an answer, as by a provider torn down
    /// while the request is in flight.
    Unanswered,
}

/// Provider side of a native connection.
#[derive(Clone, Debug)]
pub struct NativeEnd {
    /// Events pushed to the router.
    pub events: Sender<ConnectionEvent>,
    /// Messages sent by the router.
    pub outgoing: Receiver<String>,
}

#[derive(Default)]
struct EngineState {
    next_subscription: u64,
    sinks: Vec<SinkRecord>,
    routes: Vec<RouteRecord>,
    sink_observers: HashMap<u64, Arc<dyn Fn(Vec<SinkRecord>) + Send + Sync>>,
    route_observers: HashMap<u64, Arc<dyn Fn(Vec<RouteRecord>) + Send + Sync>>,
    message_observers: HashMap<u64, (String, Arc<dyn Fn(Vec<RouteMessage>) + Send + Sync>)>,
    state_callbacks: HashMap<u64, (String, Arc<dyn Fn(StateChangeInfo) + Send + Sync>)>,
    planned: VecDeque<LoopbackOutcome>,
    native_ends: HashMap<String, NativeEnd>,
    device_info: HashMap<String, SinkDeviceInfo>,
    requests: Vec<RouteRequest>,
    generic_sends: Vec<(String, String)>,
    terminated: Vec<String>,
    user_gestures: usize,
}

impl EngineState {
    fn next_id(&mut self) -> u64 {
        self.next_subscription += 1;
        self.next_subscription
    }

    fn subscription_count(&self) -> usize {
        self.sink_observers.len()
            + self.route_observers.len()
            + self.message_observers.len()
            + self.state_callbacks.len()
    }
}

#[derive(Default)]
struct LoopbackEngine {
    state: Arc<Mutex<EngineState>>,
}

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackEngine {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        lock(&self.state)
    }

    /// Unsubscribes by removing the entry `id` with `remove`.
    fn subscription<F>(&self, id: u64, remove: F) -> Subscription
    where
        F: FnOnce(&mut EngineState, u64) + Send + 'static,
    {
        let weak: Weak<Mutex<EngineState>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                remove(&mut lock(&state), id);
            }
        })
    }

    fn publish_sinks(&self) {
        let (sinks, observers) = {
            let state = self.state();
            let observers: Vec<_> = state.sink_observers.values().cloned().collect();
            (state.sinks.clone(), observers)
        };
        for observer in observers {
            observer(sinks.clone());
        }
    }

    fn publish_routes(&self) {
        let (routes, observers) = {
            let state = self.state();
            let observers: Vec<_> = state.route_observers.values().cloned().collect();
            (state.routes.clone(), observers)
        };
        for observer in observers {
            observer(routes.clone());
        }
    }

    /// Delivers a state change through the native connection if there is
    /// one, through the state callbacks otherwise.
    fn emit_state(&self, route_id: &str, info: StateChangeInfo) -> usize {
        let (native, callbacks) = {
            let state = self.state();
            let native = state.native_ends.get(route_id).map(|end| end.events.clone());
            let callbacks: Vec<_> = state
                .state_callbacks
                .values()
                .filter(|(id, _)| id == route_id)
                .map(|(_, cb)| Arc::clone(cb))
                .collect();
            (native, callbacks)
        };

        if let Some(events) = native {
            let event = match &info.close_reason {
                Some(reason) => ConnectionEvent::Closed(reason.clone()),
                None => ConnectionEvent::StateChanged(info.state.clone()),
            };
            return usize::from(events.send(event).is_ok());
        }

        let count = callbacks.len();
        for callback in callbacks {
            callback(info.clone());
        }
        count
    }

    fn emit_messages(&self, route_id: &str, messages: Vec<RouteMessage>) -> usize {
        let observers: Vec<_> = self
            .state()
            .message_observers
            .values()
            .filter(|(id, _)| id == route_id)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        let count = observers.len();
        for observer in observers {
            observer(messages.clone());
        }
        count
    }
}

impl SinkDiscovery for LoopbackEngine {
    fn observe_sinks(&self, presentation_url: &str, callback: SinksCallback) -> Subscription {
        let callback: Arc<dyn Fn(Vec<SinkRecord>) + Send + Sync> = Arc::from(callback);
        let (id, current) = {
            let mut state = self.state();
            let id = state.next_id();
            state.sink_observers.insert(id, Arc::clone(&callback));
            (id, state.sinks.clone())
        };
        debug!(presentation_url = %presentation_url, "Loopback sink observer added");
        if !current.is_empty() {
            callback(current);
        }
        self.subscription(id, |state, id| {
            state.sink_observers.remove(&id);
        })
    }

    fn sink_device_info(&self, sink_id: &str) -> Option<SinkDeviceInfo> {
        self.state().device_info.get(sink_id).cloned()
    }
}

impl RouteProvider for LoopbackEngine {
    fn on_user_gesture(&self) {
        self.state().user_gestures += 1;
    }

    fn create_route(&self, request: RouteRequest, callback: CreateRouteCallback) {
        let result = {
            let mut state = self.state();
            state.requests.push(request.clone());
            let outcome = state
                .planned
                .pop_front()
                .unwrap_or(LoopbackOutcome::Connected);

            match outcome {
                LoopbackOutcome::Unanswered => None,
                LoopbackOutcome::Fail(code, error) => Some(RouteRequestResult::error(code, &error)),
                outcome => {
                    let sink_name = state
                        .sinks
                        .iter()
                        .find(|s| s.id == request.sink_id)
                        .map(|s| s.name.clone())
                        .unwrap_or_else(|| request.sink_id.clone());
                    let route = RouteRecord {
                        route_id: Uuid::new_v4().to_string(),
                        source_id: request.source_id.clone(),
                        sink_id: request.sink_id.clone(),
                        sink_name,
                    };
                    state.routes.push(route.clone());

                    let connection = if outcome == LoopbackOutcome::ConnectedNative {
                        let (events_tx, events_rx) = unbounded();
                        let (outgoing_tx, outgoing_rx) = unbounded();
                        state.native_ends.insert(
                            route.route_id.clone(),
                            NativeEnd {
                                events: events_tx,
                                outgoing: outgoing_rx,
                            },
                        );
                        Some(RouteConnection {
                            events: events_rx,
                            outgoing: outgoing_tx,
                        })
                    } else {
                        None
                    };
                    Some(RouteRequestResult::ok(route, connection))
                }
            }
        };

        let Some(result) = result else {
            debug!(source = %request.source_id, "Loopback route request left unanswered");
            return;
        };

        let created = result.code == RouteRequestResultCode::Ok;
        callback(result);
        if created {
            self.publish_routes();
        }
    }

    fn send_route_message(&self, route_id: &str, message: String) {
        self.state()
            .generic_sends
            .push((route_id.to_string(), message));
    }

    fn terminate_route(&self, route_id: &str) {
        let known = {
            let mut state = self.state();
            state.terminated.push(route_id.to_string());
            let before = state.routes.len();
            state.routes.retain(|r| r.route_id != route_id);
            state.routes.len() != before
        };
        if !known {
            return;
        }
        self.emit_state(route_id, StateChangeInfo::new("terminated"));
        self.state().native_ends.remove(route_id);
        self.publish_routes();
    }

    fn observe_routes(&self, callback: RoutesCallback) -> Subscription {
        let id = {
            let mut state = self.state();
            let id = state.next_id();
            state.route_observers.insert(id, Arc::from(callback));
            id
        };
        self.subscription(id, |state, id| {
            state.route_observers.remove(&id);
        })
    }

    fn observe_route_messages(&self, route_id: &str, callback: MessagesCallback) -> Subscription {
        let id = {
            let mut state = self.state();
            let id = state.next_id();
            state
                .message_observers
                .insert(id, (route_id.to_string(), Arc::from(callback)));
            id
        };
        self.subscription(id, |state, id| {
            state.message_observers.remove(&id);
        })
    }

    fn add_connection_state_callback(
        &self,
        route_id: &str,
        callback: StateChangedCallback,
    ) -> Subscription {
        let id = {
            let mut state = self.state();
            let id = state.next_id();
            state
                .state_callbacks
                .insert(id, (route_id.to_string(), Arc::from(callback)));
            id
        };
        self.subscription(id, |state, id| {
            state.state_callbacks.remove(&id);
        })
    }
}

/// Sink discovery and route provider living in the same process.
#[derive(Clone, Default)]
pub struct LoopbackBackend {
    engine: Arc<LoopbackEngine>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the sink list and pushes it to the observers.
    pub fn push_sinks(&self, sinks: Vec<SinkRecord>) {
        self.engine.state().sinks = sinks;
        self.engine.publish_sinks();
    }

    /// Replaces the route list and pushes it to the observers.
    pub fn push_routes(&self, routes: Vec<RouteRecord>) {
        self.engine.state().routes = routes;
        self.engine.publish_routes();
    }

    /// Queues the answer to the next CreateRoute. Unplanned requests succeed
    /// without a native connection.
    pub fn plan(&self, outcome: LoopbackOutcome) {
        self.engine.state().planned.push_back(outcome);
    }

    pub fn set_device_info(&self, sink_id: &str, info: SinkDeviceInfo) {
        self.engine
            .state()
            .device_info
            .insert(sink_id.to_string(), info);
    }

    /// Emits a provider state for `route_id`. Returns how many channels it
    /// was delivered to.
    pub fn emit_state(&self, route_id: &str, state: &str) -> usize {
        self.engine.emit_state(route_id, StateChangeInfo::new(state))
    }

    /// Closes `route_id` from the provider side.
    pub fn close(&self, route_id: &str, reason: &str) -> usize {
        self.engine.emit_state(route_id, StateChangeInfo::closed(reason))
    }

    /// Emits messages on the fallback path of `route_id`.
    pub fn emit_messages(&self, route_id: &str, messages: Vec<RouteMessage>) -> usize {
        self.engine.emit_messages(route_id, messages)
    }

    /// Provider end of the native connection of `route_id`.
    pub fn native_end(&self, route_id: &str) -> Option<NativeEnd> {
        self.engine.state().native_ends.get(route_id).cloned()
    }

    pub fn requests(&self) -> Vec<RouteRequest> {
        self.engine.state().requests.clone()
    }

    /// Messages sent through the provider, as `(route_id, message)`.
    pub fn generic_sends(&self) -> Vec<(String, String)> {
        self.engine.state().generic_sends.clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.engine.state().terminated.clone()
    }

    pub fn user_gestures(&self) -> usize {
        self.engine.state().user_gestures
    }

    /// Message observers and state callbacks registered for `route_id`.
    pub fn route_subscriptions(&self, route_id: &str) -> (usize, usize) {
        let state = self.engine.state();
        let messages = state
            .message_observers
            .values()
            .filter(|(id, _)| id == route_id)
            .count();
        let states = state
            .state_callbacks
            .values()
            .filter(|(id, _)| id == route_id)
            .count();
        (messages, states)
    }

    /// Every live subscription, all kinds together.
    pub fn active_subscriptions(&self) -> usize {
        self.engine.state().subscription_count()
    }
}

impl MediaBackend for LoopbackBackend {
    fn sink_discovery(&self) -> Arc<dyn SinkDiscovery> {
        self.engine.clone()
    }

    fn route_provider(&self) -> Arc<dyn RouteProvider> {
        self.engine.clone()
    }
}
