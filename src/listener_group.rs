use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A process-wide wait-group so `run_forever` can block until every accept
/// loop has exited (spec §2, §4.8).
#[derive(Clone, Default)]
pub struct ListenerGroup {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    count: AtomicUsize,
    idle: Notify,
}

/// RAII membership token. Dropping it (or calling [`Guard::leave`] explicitly)
/// decrements the group and, if it reaches zero, wakes every `wait()`.
pub struct Guard {
    group: ListenerGroup,
    left: bool,
}

impl ListenerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one accept loop's membership in the group.
    pub fn enter(&self) -> Guard {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        Guard { group: self.clone(), left: false }
    }

    /// Resolves once every member has called [`Guard::leave`] (or been
    /// dropped) and the count returns to zero.
    pub async fn wait(&self) {
        loop {
            // As in `SocketBackend::prepare_to_close`: register for the next
            // wakeup before checking the count, so a `leave()` landing
            // between the check and the `.await` can't strand us here
            // forever.
            let notified = self.inner.idle.notified();
            if self.inner.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn leave(&self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl Guard {
    pub fn leave(mut self) {
        self.group.leave();
        self.left = true;
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        if !self.left {
            self.group.leave();
        }
    }
}
