//! Media router: sink discovery aggregation, route lifecycle and observer
//! fan-out over pluggable Cast/DIAL engines.
//!
//! A [`MediaRouterContext`] owns one router thread. Everything that mutates
//! router state runs there; the public types ([`MediaRouter`],
//! [`MediaSink`], [`MediaRoute`], [`Registration`]) can be used from any
//! thread and post their work to it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pmomediarouter::{LoopbackBackend, MediaRouterConfig, MediaRouterContext};
//!
//! let backend = Arc::new(LoopbackBackend::new());
//! let context = MediaRouterContext::new(backend, MediaRouterConfig::load("")?)?;
//! let router = context.media_router(None)?;
//! let source = router.get_source("cast:233637DE?clientId=42");
//! assert!(source.is_some());
//! # Ok::<(), anyhow::Error>(())
//! ```

mod aggregator;
mod channel;
mod dispatch;
mod manager;
mod route_state;
#[cfg(test)]
mod test_support;

pub mod backend;
pub mod config;
pub mod context;
pub mod errors;
pub mod loopback;
pub mod model;
pub mod registration;
pub mod route;
pub mod router;
pub mod sink;
pub mod source;

pub use backend::{
    ConnectionEvent, MediaBackend, RouteConnection, RouteMessage, RouteProvider, RouteRecord,
    RouteRequest, RouteRequestResult, SinkDiscovery, SinkRecord, StateChangeInfo, Subscription,
};
pub use config::{MediaRouterConfig, RouterSettings};
pub use context::MediaRouterContext;
pub use dispatch::ContextHandle;
pub use errors::{MediaRouterError, RouteValidationError};
pub use loopback::{LoopbackBackend, LoopbackOutcome, NativeEnd};
pub use model::{
    ConnectionState, ProviderKind, RouteCreateResult, RouteRequestResultCode, SinkDeviceInfo,
    SinkIconType,
};
pub use registration::{MediaObserver, Registration};
pub use route::MediaRoute;
pub use router::{CompletionCallback, MediaRouter};
pub use sink::MediaSink;
pub use source::MediaSource;
