use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

struct ActivityShared {
    holds: AtomicUsize,
    changed: Notify,
}

/// Tracks who still owes a transaction work.
///
/// A transaction only counts towards auto-commit while nothing holds it: no
/// scope is being polled and no delivered result is waiting to be consumed.
#[derive(Clone)]
pub(crate) struct Activity {
    shared: Arc<ActivityShared>,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            shared: Arc::new(ActivityShared {
                holds: AtomicUsize::new(0),
                changed: Notify::new(),
            }),
        }
    }
}

impl Activity {
    pub(crate) fn hold(&self) -> Hold {
        self.shared.holds.fetch_add(1, Ordering::SeqCst);
        Hold {
            activity: self.clone(),
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.shared.holds.load(Ordering::SeqCst) == 0
    }

    /// Wakes a driver parked in [`Activity::changed`].
    pub(crate) fn wake(&self) {
        self.shared.changed.notify_one();
    }

    /// Resolves after the next release or [`Activity::wake`]. A wake that
    /// happened before the call is not lost.
    pub(crate) async fn changed(&self) {
        self.shared.changed.notified().await;
    }
}

/// Keeps a transaction from committing on its own while alive.
///
/// Requests still run while a hold exists; only the idle countdown waits.
#[must_use = "dropping a hold releases it immediately"]
pub struct Hold {
    activity: Activity,
}

impl Drop for Hold {
    fn drop(&mut self) {
        if self.activity.shared.holds.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.activity.wake();
        }
    }
}

impl std::fmt::Debug for Hold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hold")
            .field("holds", &self.activity.shared.holds.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Activity;

    #[test]
    fn holds_nest_and_release() {
        let activity = Activity::default();
        assert!(activity.is_idle());
        let outer = activity.hold();
        let inner = activity.hold();
        drop(outer);
        assert!(!activity.is_idle());
        drop(inner);
        assert!(activity.is_idle());
    }

    #[tokio::test]
    async fn last_release_wakes_a_waiter() {
        let activity = Activity::default();
        let hold = activity.hold();
        let waiter = {
            let activity = activity.clone();
            tokio::spawn(async move { activity.changed().await })
        };
        drop(hold);
        waiter.await.expect("waiter");
        assert!(activity.is_idle());
    }
}
