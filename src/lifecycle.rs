use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::signal::Signal;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// The callback ledger and signal-source registry shared by every server and
/// channel that wants startup/shutdown/failure hooks (spec §4.7).
///
/// Each list is append-only and invoked in registration order; a later
/// callback always runs even if an earlier one panics-free-logs an error —
/// there is no short-circuiting (spec §4.7, §5). Each phase also remembers
/// whether it has already fired once: registering a callback after its
/// phase's terminal state has been reached invokes it immediately, in
/// addition to appending it to the list (the `invokeNow` policy, spec §4.6,
/// §8).
#[derive(Default)]
pub struct LifecycleManager {
    startup: Mutex<Vec<Callback>>,
    shutdown: Mutex<Vec<Callback>>,
    failure: Mutex<Vec<Callback>>,
    startup_fired: AtomicBool,
    shutdown_fired: AtomicBool,
    failure_fired: AtomicBool,
    signal_handlers: Mutex<HashMap<Signal, JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_startup(&self, callback: impl Fn() + Send + Sync + 'static) {
        Self::register(&self.startup, &self.startup_fired, callback);
    }

    pub fn on_shutdown(&self, callback: impl Fn() + Send + Sync + 'static) {
        Self::register(&self.shutdown, &self.shutdown_fired, callback);
    }

    pub fn on_failure(&self, callback: impl Fn() + Send + Sync + 'static) {
        Self::register(&self.failure, &self.failure_fired, callback);
    }

    fn register(list: &Mutex<Vec<Callback>>, fired: &AtomicBool, callback: impl Fn() + Send + Sync + 'static) {
        let callback: Callback = Arc::new(callback);
        list.lock().unwrap().push(callback.clone());
        if fired.load(Ordering::SeqCst) {
            callback();
        }
    }

    pub fn fire_startup(&self) {
        Self::fire(&self.startup, &self.startup_fired, "startup");
    }

    pub fn fire_shutdown(&self) {
        Self::fire(&self.shutdown, &self.shutdown_fired, "shutdown");
    }

    pub fn fire_failure(&self) {
        Self::fire(&self.failure, &self.failure_fired, "failure");
    }

    fn fire(list: &Mutex<Vec<Callback>>, fired: &AtomicBool, phase: &str) {
        fired.store(true, Ordering::SeqCst);
        let callbacks = list.lock().unwrap().clone();
        debug!(phase, count = callbacks.len(), "invoking lifecycle callbacks");
        for callback in callbacks {
            callback();
        }
    }

    /// Installs an async signal listener. Removing it (via [`Self::uninstall_signal`])
    /// aborts the background task, which drops the underlying
    /// `tokio::signal::unix::Signal` and restores default disposition.
    pub fn install_signal(self: &Arc<Self>, signal: Signal, callback: impl Fn() + Send + Sync + 'static) {
        let mut kind = match tokio::signal::unix::signal(signal.kind()) {
            Ok(kind) => kind,
            Err(err) => {
                error!(?signal, %err, "failed to install signal handler");
                return;
            }
        };

        let handle = tokio::spawn(async move {
            loop {
                if kind.recv().await.is_none() {
                    break;
                }
                callback();
            }
        });

        if let Some(previous) = self.signal_handlers.lock().unwrap().insert(signal, handle) {
            previous.abort();
        }
    }

    pub fn uninstall_signal(&self, signal: Signal) {
        if let Some(handle) = self.signal_handlers.lock().unwrap().remove(&signal) {
            handle.abort();
        }
    }
}
