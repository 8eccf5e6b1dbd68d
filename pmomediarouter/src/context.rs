//! Owning context of a media router.
//!
//! A [`MediaRouterContext`] owns the router thread and, on that thread, the
//! [`ContextState`]: the backend accessor, the configuration and the lazily
//! created [`MediaRouterManager`]. Dropping the context (or calling
//! [`MediaRouterContext::shutdown`]) destroys the manager on its thread,
//! which tells every registered observer before releasing route state.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::backend::{MediaBackend, SinkDiscovery};
use crate::config::MediaRouterConfig;
use crate::dispatch::{self, ContextHandle};
use crate::errors::MediaRouterError;
use crate::manager::MediaRouterManager;
use crate::router::{CompletionCallback, MediaRouter};

/// State only ever touched on the router thread.
pub(crate) struct ContextState {
    handle: ContextHandle,
    backend: Arc<dyn MediaBackend>,
    config: MediaRouterConfig,
    manager: Option<MediaRouterManager>,
}

impl ContextState {
    fn new(handle: ContextHandle, backend: Arc<dyn MediaBackend>, config: MediaRouterConfig) -> Self {
        Self {
            handle,
            backend,
            config,
            manager: None,
        }
    }

    pub(crate) fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    pub(crate) fn sink_discovery(&self) -> Arc<dyn SinkDiscovery> {
        self.backend.sink_discovery()
    }

    /// Returns the manager, creating it on first access.
    pub(crate) fn media_router_manager(&mut self) -> &mut MediaRouterManager {
        debug_assert!(self.handle.is_on_router_thread());
        if self.manager.is_none() {
            debug!("Creating media router manager");
        }
        let handle = &self.handle;
        let backend = &self.backend;
        let config = &self.config;
        self.manager.get_or_insert_with(|| {
            MediaRouterManager::new(Arc::clone(backend), handle.clone(), config.router.clone())
        })
    }

    /// Returns the manager only if it already exists.
    ///
    /// Engine callbacks use this so that a late notification never
    /// resurrects a destroyed manager.
    pub(crate) fn existing_manager(&mut self) -> Option<&mut MediaRouterManager> {
        self.manager.as_mut()
    }

    fn destroy_manager(&mut self) {
        if let Some(manager) = self.manager.take() {
            debug!("Destroying media router manager");
            drop(manager);
        }
    }
}

/// Owns a router thread and the state living on it.
pub struct MediaRouterContext {
    handle: ContextHandle,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MediaRouterContext {
    /// Starts a context over `backend`. Nothing touches the engines until the
    /// manager is first needed.
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        config: MediaRouterConfig,
    ) -> Result<Self, MediaRouterError> {
        let (handle, receiver) = ContextHandle::channel();
        let thread_handle = handle.clone();
        let thread_name = config.router.thread_name.clone();

        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                thread_handle.bind_current_thread();
                let mut state = ContextState::new(thread_handle.clone(), backend, config);

                dispatch::run_until_shutdown(&receiver, &mut state);

                state.destroy_manager();
                thread_handle.mark_gone();
                drop(state);
                dispatch::drain_after_shutdown(receiver);
                debug!("Media router thread exited");
            })?;

        info!(thread = %thread_name, "Media router context started");

        Ok(Self {
            handle,
            thread: Mutex::new(Some(join)),
        })
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }

    /// Creates a router bound to this context.
    ///
    /// The router is usable right away; its operations are queued until the
    /// context has initialized it. `on_complete` is called once
    /// initialization is done.
    pub fn media_router(
        &self,
        on_complete: Option<CompletionCallback>,
    ) -> Result<MediaRouter, MediaRouterError> {
        if !self.handle.is_alive() || self.is_shut_down() {
            return Err(MediaRouterError::ContextGone);
        }
        let router = MediaRouter::new(self.handle.clone());
        router.initialize(on_complete);
        Ok(router)
    }

    fn is_shut_down(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Destroys the manager and stops the router thread. Idempotent.
    pub fn shutdown(&self) {
        let join = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(join) = join else {
            return;
        };

        info!("Shutting down media router context");
        self.handle.request_shutdown();

        if self.handle.is_on_router_thread() {
            // Appelé depuis le thread du routeur: on ne peut pas se joindre
            // soi-même, le thread se terminera après la tâche courante.
            return;
        }

        if join.join().is_err() {
            warn!("Media router thread panicked");
        }
    }
}

impl Drop for MediaRouterContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
