//! Router thread plumbing.
//!
//! All router state lives on one thread per context. Everything else talks
//! to it by posting a [`Task`] through a [`ContextHandle`]. A task receives
//! `Some(state)` when it runs on the live router thread, and `None` once the
//! context is gone. A task that is dropped without having been run (closed
//! channel, discarded queue) is run with `None`, so a callback carried by a
//! task is always called exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::context::ContextState;

type TaskFn = Box<dyn FnOnce(Option<&mut ContextState>) + Send>;

pub(crate) struct Task {
    run: Option<TaskFn>,
}

impl Task {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce(Option<&mut ContextState>) + Send + 'static,
    {
        Self {
            run: Some(Box::new(f)),
        }
    }

    pub(crate) fn run(mut self, state: Option<&mut ContextState>) {
        if let Some(f) = self.run.take() {
            f(state);
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(f) = self.run.take() {
            f(None);
        }
    }
}

pub(crate) enum Envelope {
    Run(Task),
    Shutdown,
}

/// Cloneable reference to a router context.
///
/// Holding a handle never keeps the context alive: once the context is shut
/// down, posted work runs with `None` instead of the context state.
#[derive(Clone)]
pub struct ContextHandle {
    sender: Sender<Envelope>,
    thread: Arc<OnceLock<ThreadId>>,
    alive: Arc<AtomicBool>,
}

impl ContextHandle {
    pub(crate) fn channel() -> (Self, Receiver<Envelope>) {
        let (sender, receiver) = unbounded();
        let handle = Self {
            sender,
            thread: Arc::new(OnceLock::new()),
            alive: Arc::new(AtomicBool::new(true)),
        };
        (handle, receiver)
    }

    /// Runs `f` on the router thread.
    pub(crate) fn post<F>(&self, f: F)
    where
        F: FnOnce(Option<&mut ContextState>) + Send + 'static,
    {
        // En cas d'échec, l'enveloppe est rendue puis détruite: la tâche
        // s'exécute alors avec None.
        let _ = self.sender.send(Envelope::Run(Task::new(f)));
    }

    pub(crate) fn request_shutdown(&self) {
        let _ = self.sender.send(Envelope::Shutdown);
    }

    pub(crate) fn bind_current_thread(&self) {
        let _ = self.thread.set(thread::current().id());
    }

    pub(crate) fn mark_gone(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// True when called from the router thread of this context.
    pub fn is_on_router_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    /// False once the context has been shut down.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// True if both handles refer to the same context.
    pub fn same_context(&self, other: &ContextHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Drains the queue until a shutdown request arrives.
pub(crate) fn run_until_shutdown(receiver: &Receiver<Envelope>, state: &mut ContextState) {
    for envelope in receiver.iter() {
        match envelope {
            Envelope::Run(task) => task.run(Some(&mut *state)),
            Envelope::Shutdown => break,
        }
    }
}

/// Runs whatever is still queued as "context gone".
pub(crate) fn drain_after_shutdown(receiver: Receiver<Envelope>) {
    while let Ok(envelope) = receiver.try_recv() {
        if let Envelope::Run(task) = envelope {
            task.run(None);
        }
    }
}
