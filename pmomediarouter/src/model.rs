//! Public enums shared by the router, the observers and the backends.

use std::fmt;

/// Which route provider is responsible for a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Cast,
    Dial,
}

/// Icon hint reported by the discovery engine for a sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SinkIconType {
    Cast,
    CastAudioGroup,
    CastAudio,
    Meeting,
    Hangout,
    Education,
    WiredDisplay,
    #[default]
    Generic,
}

/// Network details of a sink, as known by the discovery engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SinkDeviceInfo {
    pub ip_address: String,
    pub port: u16,
    pub model_name: String,
}

/// Connection state of a route, as delivered to observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closed,
    Terminated,
    /// Anything the provider reports that we do not know about.
    Unknown,
}

impl ConnectionState {
    /// Map a raw provider state string to a logical connection state.
    pub fn from_provider_state(raw: &str) -> Self {
        let s = raw.trim().to_ascii_lowercase();
        match s.as_str() {
            "connecting" => ConnectionState::Connecting,
            "connected" => ConnectionState::Connected,
            "closed" => ConnectionState::Closed,
            "terminated" => ConnectionState::Terminated,
            _ => ConnectionState::Unknown,
        }
    }

    /// True for the states after which a route has no usable channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Terminated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Terminated => "TERMINATED",
            ConnectionState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result code handed to the CreateRoute callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteCreateResult {
    /// Also used for every locally detected validation failure.
    UnknownError,
    Ok,
    TimedOut,
    RouteNotFound,
    SinkNotFound,
    InvalidOrigin,
    NoSupportedProvider,
    Cancelled,
    RouteAlreadyExists,
    RouteAlreadyTerminated,
}

impl RouteCreateResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, RouteCreateResult::Ok)
    }
}

/// Result code reported by the route provider engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteRequestResultCode {
    UnknownError,
    Ok,
    TimedOut,
    RouteNotFound,
    SinkNotFound,
    InvalidOrigin,
    NoSupportedProvider,
    Cancelled,
    RouteAlreadyExists,
    RouteAlreadyTerminated,
}

impl From<RouteRequestResultCode> for RouteCreateResult {
    fn from(code: RouteRequestResultCode) -> Self {
        match code {
            RouteRequestResultCode::UnknownError => RouteCreateResult::UnknownError,
            RouteRequestResultCode::Ok => RouteCreateResult::Ok,
            RouteRequestResultCode::TimedOut => RouteCreateResult::TimedOut,
            RouteRequestResultCode::RouteNotFound => RouteCreateResult::RouteNotFound,
            RouteRequestResultCode::SinkNotFound => RouteCreateResult::SinkNotFound,
            RouteRequestResultCode::InvalidOrigin => RouteCreateResult::InvalidOrigin,
            RouteRequestResultCode::NoSupportedProvider => RouteCreateResult::NoSupportedProvider,
            RouteRequestResultCode::Cancelled => RouteCreateResult::Cancelled,
            RouteRequestResultCode::RouteAlreadyExists => RouteCreateResult::RouteAlreadyExists,
            RouteRequestResultCode::RouteAlreadyTerminated => {
                RouteCreateResult::RouteAlreadyTerminated
            }
        }
    }
}
