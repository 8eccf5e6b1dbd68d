//! Per-route communication path.
//!
//! When the provider hands back a native connection, that connection is the
//! only way messages are sent and the only source of state and message
//! events for the route. Otherwise we fall back on a message observer and a
//! state-change subscription registered with the provider.

use std::io;
use std::thread;

use crossbeam_channel::{Receiver, Sender, select};
use tracing::debug;

use crate::backend::{ConnectionEvent, RouteConnection, RouteMessage, RouteRecord, StateChangeInfo, Subscription};
use crate::dispatch::ContextHandle;

/// Identifies one channel instance, so that events from a replaced or
/// removed channel can be told apart from the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ChannelId(pub(crate) u64);

pub(crate) enum RouteConnectionChannel {
    Native(PresentationConnection),
    Fallback {
        _message_observer: Subscription,
        _state_subscription: Subscription,
    },
}

impl RouteConnectionChannel {
    pub(crate) fn fallback(message_observer: Subscription, state_subscription: Subscription) -> Self {
        RouteConnectionChannel::Fallback {
            _message_observer: message_observer,
            _state_subscription: state_subscription,
        }
    }

    pub(crate) fn native(&self) -> Option<&PresentationConnection> {
        match self {
            RouteConnectionChannel::Native(connection) => Some(connection),
            RouteConnectionChannel::Fallback { .. } => None,
        }
    }

    pub(crate) fn is_native(&self) -> bool {
        self.native().is_some()
    }
}

/// Native connection for a route.
///
/// A pump thread forwards incoming events to the router thread until the
/// connection is dropped or the provider closes its end. Without that thread
/// the connection would never report its state, so `open` fails when it
/// cannot be started.
pub(crate) struct PresentationConnection {
    route_id: String,
    outgoing: Sender<String>,
    // Dropping the sender stops the pump.
    _stop: Sender<()>,
}

impl PresentationConnection {
    pub(crate) fn open(
        route: RouteRecord,
        connection: RouteConnection,
        channel_id: ChannelId,
        handle: ContextHandle,
    ) -> io::Result<Self> {
        let RouteConnection { events, outgoing } = connection;
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let route_id = route.route_id.clone();

        // Route ids come from the provider and may not be valid thread names.
        thread::Builder::new()
            .name(format!("route-pump-{}", channel_id.0))
            .spawn(move || pump_events(route, events, stop_rx, channel_id, handle))?;

        Ok(Self {
            route_id,
            outgoing,
            _stop: stop_tx,
        })
    }

    pub(crate) fn send_route_message(&self, message: String) {
        if self.outgoing.send(message).is_err() {
            debug!(route_id = %self.route_id, "Native connection closed, message dropped");
        }
    }
}

fn pump_events(
    route: RouteRecord,
    events: Receiver<ConnectionEvent>,
    stop: Receiver<()>,
    channel_id: ChannelId,
    handle: ContextHandle,
) {
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => forward_event(&route, event, channel_id, &handle),
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }
    debug!(route_id = %route.route_id, "Connection pump stopped");
}

fn forward_event(route: &RouteRecord, event: ConnectionEvent, channel_id: ChannelId, handle: &ContextHandle) {
    let route = route.clone();
    match event {
        ConnectionEvent::Message(text) => {
            post_messages(handle, route, vec![RouteMessage::Text(Some(text))])
        }
        ConnectionEvent::Data(data) => {
            post_messages(handle, route, vec![RouteMessage::Binary(Some(data))])
        }
        ConnectionEvent::StateChanged(state) => {
            post_state_change(handle, channel_id, route, StateChangeInfo::new(&state))
        }
        ConnectionEvent::Closed(reason) => {
            post_state_change(handle, channel_id, route, StateChangeInfo::closed(&reason))
        }
    }
}

/// Forwards messages received on a channel to the manager.
pub(crate) fn post_messages(handle: &ContextHandle, route: RouteRecord, messages: Vec<RouteMessage>) {
    if messages.is_empty() {
        return;
    }
    handle.post(move |state| {
        if let Some(manager) = state.and_then(|s| s.existing_manager()) {
            manager.on_messages_received(&route, messages);
        }
    });
}

/// Forwards a state change observed on channel `channel_id` to the manager.
pub(crate) fn post_state_change(
    handle: &ContextHandle,
    channel_id: ChannelId,
    route: RouteRecord,
    info: StateChangeInfo,
) {
    handle.post(move |state| {
        if let Some(manager) = state.and_then(|s| s.existing_manager()) {
            manager.on_route_state_change(channel_id, &route, &info);
        }
    });
}
