use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between the caller, worker threads
/// and retry sleeps.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        match flag.lock() {
            Ok(mut cancelled) => *cancelled = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        match flag.lock() {
            Ok(cancelled) => *cancelled,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Blocks for up to `timeout`. Returns `true` if cancelled before or
    /// during the wait. A timeout past the clock's range waits for
    /// cancellation only.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, signal) = &*self.inner;
        let deadline = Instant::now().checked_add(timeout);
        let Ok(mut cancelled) = flag.lock() else {
            return true;
        };
        while !*cancelled {
            let waited = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    signal
                        .wait_timeout(cancelled, deadline - now)
                        .map(|(guard, _)| guard)
                        .map_err(|_| ())
                }
                None => signal.wait(cancelled).map_err(|_| ()),
            };
            match waited {
                Ok(guard) => cancelled = guard,
                Err(_) => return true,
            }
        }
        true
    }
}
