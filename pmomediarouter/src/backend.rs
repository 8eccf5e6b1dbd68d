//! Boundary with the engines that do the real work.
//!
//! The router never talks to devices itself. Sink discovery (Cast/DIAL
//! scanning) and route providers (the session protocols) are plugged in
//! through the traits below. Every callback handed to an engine may be
//! invoked from any thread; the router re-posts it to its own thread.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::model::{ConnectionState, ProviderKind, RouteRequestResultCode, SinkDeviceInfo, SinkIconType};

pub type SinksCallback = Box<dyn Fn(Vec<SinkRecord>) + Send + Sync>;
pub type RoutesCallback = Box<dyn Fn(Vec<RouteRecord>) + Send + Sync>;
pub type MessagesCallback = Box<dyn Fn(Vec<RouteMessage>) + Send + Sync>;
pub type StateChangedCallback = Box<dyn Fn(StateChangeInfo) + Send + Sync>;
pub type CreateRouteCallback = Box<dyn FnOnce(RouteRequestResult) + Send>;

/// Sink as reported by the discovery engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkRecord {
    pub id: String,
    pub name: String,
    pub icon_type: SinkIconType,
    pub provider: ProviderKind,
}

impl SinkRecord {
    pub fn new(id: &str, name: &str, provider: ProviderKind) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            icon_type: SinkIconType::default(),
            provider,
        }
    }

    pub fn with_icon(mut self, icon_type: SinkIconType) -> Self {
        self.icon_type = icon_type;
        self
    }
}

/// Route as reported by the route provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteRecord {
    pub route_id: String,
    pub source_id: String,
    pub sink_id: String,
    pub sink_name: String,
}

/// Message received on a route, text or binary.
///
/// The payload is optional because providers may forward empty frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteMessage {
    Text(Option<String>),
    Binary(Option<Vec<u8>>),
}

impl RouteMessage {
    pub fn text(message: &str) -> Self {
        RouteMessage::Text(Some(message.to_string()))
    }

    pub fn binary(data: Vec<u8>) -> Self {
        RouteMessage::Binary(Some(data))
    }

    /// Raw bytes carried by the message, if any.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            RouteMessage::Text(Some(s)) => Some(s.as_bytes()),
            RouteMessage::Binary(Some(data)) => Some(data.as_slice()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChangeInfo {
    /// Provider state string, see `ConnectionState::from_provider_state`.
    pub state: String,
    pub close_reason: Option<String>,
    pub message: Option<String>,
}

impl StateChangeInfo {
    pub fn new(state: &str) -> Self {
        Self {
            state: state.to_string(),
            close_reason: None,
            message: None,
        }
    }

    pub fn closed(reason: &str) -> Self {
        Self {
            state: "closed".to_string(),
            close_reason: Some(reason.to_string()),
            message: None,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_provider_state(&self.state)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteRequest {
    pub source_id: String,
    pub sink_id: String,
    /// Serialized origin of the requester, empty for an opaque origin.
    pub origin: String,
    pub timeout: Duration,
    pub incognito: bool,
}

/// Event emitted by a native presentation connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Message(String),
    Data(Vec<u8>),
    StateChanged(String),
    Closed(String),
}

/// Native bidirectional connection handed back by a provider.
///
/// `events` is the receiving end (provider to router), `outgoing` the
/// sending end (router to provider).
pub struct RouteConnection {
    pub events: Receiver<ConnectionEvent>,
    pub outgoing: Sender<String>,
}

impl fmt::Debug for RouteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteConnection").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct RouteRequestResult {
    pub code: RouteRequestResultCode,
    pub error: String,
    pub route: Option<RouteRecord>,
    pub connection: Option<RouteConnection>,
}

impl RouteRequestResult {
    pub fn ok(route: RouteRecord, connection: Option<RouteConnection>) -> Self {
        Self {
            code: RouteRequestResultCode::Ok,
            error: String::new(),
            route: Some(route),
            connection,
        }
    }

    pub fn error(code: RouteRequestResultCode, error: &str) -> Self {
        Self {
            code,
            error: error.to_string(),
            route: None,
            connection: None,
        }
    }
}

/// Keeps an engine registration alive; dropping it unregisters.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to undo.
    pub fn empty() -> Self {
        Self { cancel: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Cast/DIAL sink discovery engine.
pub trait SinkDiscovery: Send + Sync {
    /// Starts pushing sink snapshots compatible with `presentation_url`.
    fn observe_sinks(&self, presentation_url: &str, callback: SinksCallback) -> Subscription;

    /// Network details for a known sink.
    fn sink_device_info(&self, sink_id: &str) -> Option<SinkDeviceInfo>;
}

/// Route provider engine (Cast/DIAL session protocols).
pub trait RouteProvider: Send + Sync {
    /// Hint that the user interacted; providers use it to start discovery.
    fn on_user_gesture(&self) {}

    fn create_route(&self, request: RouteRequest, callback: CreateRouteCallback);

    fn send_route_message(&self, route_id: &str, message: String);

    fn terminate_route(&self, route_id: &str);

    fn observe_routes(&self, callback: RoutesCallback) -> Subscription;

    fn observe_route_messages(&self, route_id: &str, callback: MessagesCallback) -> Subscription;

    fn add_connection_state_callback(
        &self,
        route_id: &str,
        callback: StateChangedCallback,
    ) -> Subscription;
}

/// Gives access to the engines owned by the embedding application.
///
/// Callers must not keep the returned references: the application may tear
/// an engine down and create a new one between two calls.
pub trait MediaBackend: Send + Sync {
    fn sink_discovery(&self) -> Arc<dyn SinkDiscovery>;

    fn route_provider(&self) -> Arc<dyn RouteProvider>;
}
