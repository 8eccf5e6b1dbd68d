//! Public entry point of the media router.
//!
//! A [`MediaRouter`] can be used from any thread as soon as it is created.
//! Until the router thread has initialized it, every operation that needs
//! the manager is queued; initialization then replays the queue in order.
//! Afterwards operations are posted straight to the router thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::context::ContextState;
use crate::dispatch::{ContextHandle, Task};
use crate::errors::RouteValidationError;
use crate::manager::CreateRouteOutcome;
use crate::model::RouteCreateResult;
use crate::registration::{MediaObserver, Registration};
use crate::route::MediaRoute;
use crate::sink::MediaSink;
use crate::source::MediaSource;

/// Called once the router is initialized.
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

enum InitState {
    Pending(Vec<Task>),
    Ready,
}

struct RouterInner {
    handle: ContextHandle,
    state: Mutex<InitState>,
}

impl RouterInner {
    fn state(&self) -> MutexGuard<'_, InitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switches to `Ready` and hands back the queued tasks, or `None` if the
    /// router was already initialized.
    fn mark_ready(&self) -> Option<Vec<Task>> {
        match std::mem::replace(&mut *self.state(), InitState::Ready) {
            InitState::Pending(tasks) => Some(tasks),
            InitState::Ready => None,
        }
    }
}

#[derive(Clone)]
pub struct MediaRouter {
    inner: Arc<RouterInner>,
}

impl MediaRouter {
    pub(crate) fn new(handle: ContextHandle) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                handle,
                state: Mutex::new(InitState::Pending(Vec::new())),
            }),
        }
    }

    /// Posts the initialization to the router thread.
    pub(crate) fn initialize(&self, on_complete: Option<CompletionCallback>) {
        let inner = Arc::clone(&self.inner);
        self.inner.handle.post(move |state| {
            let Some(state) = state else {
                // Contexte détruit: les tâches en attente s'exécutent avec None.
                drop(inner.mark_ready());
                return;
            };

            state.media_router_manager();

            match inner.mark_ready() {
                Some(tasks) => {
                    debug!(pending = tasks.len(), "Media router initialized");
                    for task in tasks {
                        task.run(Some(&mut *state));
                    }
                }
                None => warn!("Media router already initialized"),
            }

            if let Some(on_complete) = on_complete {
                state.handle().post(move |_| on_complete());
            }
        });
    }

    /// Queues `f` until initialization, or posts it if already initialized.
    fn store_or_trigger<F>(&self, f: F)
    where
        F: FnOnce(Option<&mut ContextState>) + Send + 'static,
    {
        {
            let mut state = self.inner.state();
            if let InitState::Pending(tasks) = &mut *state {
                tasks.push(Task::new(f));
                return;
            }
        }
        self.inner.handle.post(f);
    }

    /// Registers `observer`. Notifications stop when the returned
    /// [`Registration`] is dropped.
    pub fn add_observer(&self, observer: Arc<dyn MediaObserver>) -> Registration {
        let registration = Registration::new(observer);
        let inner = registration.inner();
        self.store_or_trigger(move |state| {
            if let Some(state) = state {
                inner.initialize(state);
            }
        });
        registration
    }

    /// Wraps a `cast:` or `dial:` URN into a source. No backend is contacted.
    pub fn get_source(&self, urn: &str) -> Option<MediaSource> {
        MediaSource::from_urn(urn)
    }

    /// Sends the current sink list to every observer.
    pub fn notify_current_sinks(&self) {
        self.store_or_trigger(|state| {
            if let Some(state) = state {
                state.media_router_manager().notify_current_sinks();
            }
        });
    }

    /// Sends the current route list to every observer.
    pub fn notify_current_routes(&self) {
        self.store_or_trigger(|state| {
            if let Some(state) = state {
                state.media_router_manager().notify_current_routes();
            }
        });
    }

    /// Creates a route from `source` to `sink`.
    ///
    /// `callback` is called exactly once, with the result code, an error
    /// message (empty on success) and the created route. Invalid arguments
    /// are reported with [`RouteCreateResult::UnknownError`] without
    /// contacting the provider.
    pub fn create_route<F>(&self, source: Option<&MediaSource>, sink: Option<&MediaSink>, callback: F)
    where
        F: FnOnce(RouteCreateResult, String, Option<MediaRoute>) + Send + 'static,
    {
        let (source_id, sink_id) = match self.validate_route_request(source, sink) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to create route: {}", e);
                callback(RouteCreateResult::UnknownError, e.to_string(), None);
                return;
            }
        };

        self.store_or_trigger(move |state| {
            let Some(state) = state else {
                let e = RouteValidationError::InvalidContext;
                warn!("Failed to create route: {}", e);
                callback(RouteCreateResult::UnknownError, e.to_string(), None);
                return;
            };

            let handle = state.handle().clone();
            state.media_router_manager().create_route(
                &source_id,
                &sink_id,
                "",
                Box::new(move |outcome: CreateRouteOutcome| {
                    if !outcome.code.is_ok() {
                        warn!(
                            code = ?outcome.code,
                            "Failed to create route: {}",
                            outcome.error
                        );
                    }
                    let route = outcome.route.map(|record| MediaRoute::new(record, handle));
                    callback(outcome.code, outcome.error, route);
                }),
            );
        });
    }

    fn validate_route_request(
        &self,
        source: Option<&MediaSource>,
        sink: Option<&MediaSink>,
    ) -> Result<(String, String), RouteValidationError> {
        if !self.inner.handle.is_alive() {
            return Err(RouteValidationError::InvalidContext);
        }
        let source = source.ok_or(RouteValidationError::InvalidSource)?;
        let sink = sink.ok_or(RouteValidationError::InvalidSink)?;
        if !sink.is_compatible_with(Some(source)) {
            return Err(RouteValidationError::IncompatibleSink);
        }
        Ok((source.id().to_string(), sink.id().to_string()))
    }
}

impl std::fmt::Debug for MediaRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ready = matches!(*self.inner.state(), InitState::Ready);
        f.debug_struct("MediaRouter")
            .field("context", &self.inner.handle)
            .field("initialized", &ready)
            .finish()
    }
}
