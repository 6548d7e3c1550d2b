use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Callback a [`WakeupWaitStrategy`] invokes when its ring transitions from
/// empty to non-empty.
///
/// Installed lazily by the key processor the first time it is handed the
/// producer side of the app→channel ring, breaking the cycle between the
/// ring and the processor that owns it.
pub trait WakeupSink: Send + Sync {
    fn wakeup(&self);
}

/// Policy by which a ring signals the other side when it publishes, and
/// parks the consuming side when it finds nothing to consume.
pub trait WaitStrategy: Send + Sync {
    /// Called by the producer after publishing up to and including a new
    /// sequence. `became_non_empty` is `true` when the ring held nothing
    /// consumable immediately before this release.
    fn on_release(&self, became_non_empty: bool);

    /// Called by a consumer that found nothing to drain. Implementations may
    /// park on a condition variable or spin; `should_stop` is polled so the
    /// park returns promptly on cancellation.
    fn park(&self, should_stop: &AtomicBool);
}

/// Consumer parks on a condition variable signaled by the producer's
/// `release`. Used on the channel→app ring, where the application thread
/// chooses its own pacing.
#[derive(Clone)]
pub struct BlockingWaitStrategy {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self {
            state: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn on_release(&self, _became_non_empty: bool) {
        let (mutex, condvar) = &*self.state;
        let mut signaled = mutex.lock().unwrap();
        *signaled = true;
        condvar.notify_all();
    }

    fn park(&self, should_stop: &AtomicBool) {
        let (mutex, condvar) = &*self.state;
        let mut signaled = mutex.lock().unwrap();
        while !*signaled {
            if should_stop.load(Ordering::Acquire) {
                return;
            }
            let (guard, timeout) = condvar.wait_timeout(signaled, Duration::from_millis(50)).unwrap();
            signaled = guard;
            if timeout.timed_out() {
                break;
            }
        }
        *signaled = false;
    }
}

/// Same as [`BlockingWaitStrategy`], but on an empty-to-non-empty transition
/// it additionally invokes an installed [`WakeupSink`] to re-assert
/// write-interest on the owning selector thread. Used on the app→channel
/// ring so that publishing a message wakes the selector.
///
/// The sink is installed lazily: the ring itself never holds a back-pointer
/// to the key processor, only to this opaque callback.
pub struct WakeupWaitStrategy {
    sink: Mutex<Option<Arc<dyn WakeupSink>>>,
}

impl WakeupWaitStrategy {
    pub fn new() -> Self {
        Self { sink: Mutex::new(None) }
    }

    /// Installs the sink the first time the provider hands out the producer
    /// for a processor. Later calls replace the sink (reconnects are not
    /// expected in this design, but overwriting is simpler than panicking).
    pub fn install_sink(&self, sink: Arc<dyn WakeupSink>) {
        *self.sink.lock().unwrap() = Some(sink);
    }
}

impl Default for WakeupWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for WakeupWaitStrategy {
    fn on_release(&self, became_non_empty: bool) {
        if !became_non_empty {
            return;
        }
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.wakeup();
        }
    }

    fn park(&self, _should_stop: &AtomicBool) {
        // The selector thread never blocks on this ring; it drains it
        // opportunistically on WRITE readiness. A single spin keeps the
        // trait total without pretending this path is ever exercised.
        std::hint::spin_loop();
    }
}
