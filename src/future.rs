use crate::error::{ChannelsError, ChannelsResult};
use std::sync::{Arc, Condvar, Mutex};

/// Condvar-backed completion signal for an asynchronous channel operation
/// (bind/connect/accept/close). Resolved exactly once, from the
/// selector thread; awaited from any thread.
///
/// Same shape as a `ConsumerBlockingStrategy` (mutex + condvar, flag
/// flipped under the lock, `notify_all` on completion), generalized to
/// carry a result instead of a bare signal.
pub struct CompletionFuture {
    state: Arc<(Mutex<Option<ChannelsResult<()>>>, Condvar)>,
}

/// The resolving half of a [`CompletionFuture`], held by the selector-side
/// code that will eventually know the outcome.
pub struct Promise {
    state: Arc<(Mutex<Option<ChannelsResult<()>>>, Condvar)>,
}

pub fn completion_pair() -> (Promise, CompletionFuture) {
    let state = Arc::new((Mutex::new(None), Condvar::new()));
    (Promise { state: state.clone() }, CompletionFuture { state })
}

impl Promise {
    /// Resolves the paired future. A second call is a no-op: these are
    /// one-shot by construction.
    pub fn resolve(self, result: ChannelsResult<()>) {
        let (mutex, condvar) = &*self.state;
        let mut guard = mutex.lock().unwrap();
        if guard.is_none() {
            *guard = Some(result);
            condvar.notify_all();
        }
    }
}

impl CompletionFuture {
    /// Blocks the calling thread until resolved.
    pub fn wait(self) -> ChannelsResult<()> {
        let (mutex, condvar) = &*self.state;
        let mut guard = mutex.lock().unwrap();
        while guard.is_none() {
            guard = condvar.wait(guard).unwrap();
        }
        guard.take().unwrap()
    }

    /// Blocks up to `timeout`; on expiry returns `ChannelsError::Interrupted`
    /// rather than panicking, leaving the future resolvable later if the
    /// caller retains no other handle. Callers impose their own deadlines
    /// by waiting and then cancelling.
    pub fn wait_timeout(self, timeout: std::time::Duration) -> ChannelsResult<()> {
        let (mutex, condvar) = &*self.state;
        let guard = mutex.lock().unwrap();
        let (mut guard, result) = condvar.wait_timeout_while(guard, timeout, |r| r.is_none()).unwrap();
        if result.timed_out() {
            return Err(ChannelsError::Interrupted);
        }
        guard.take().unwrap()
    }
}
