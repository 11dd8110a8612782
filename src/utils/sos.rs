use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Run-wide stop signal.
///
/// Tripped once when a stage fails fatally (or on a forced abort). Every
/// wait loop of the pipeline sleeps through `wait_timeout`, so a trip wakes
/// all of them at once instead of after their next poll.
#[derive(Debug)]
pub struct SignalOfStop {
    // Shared state between clones
    shared: Arc<SharedState>,
}

#[derive(Debug)]
struct SharedState {
    closing: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop {
            shared: Arc::new(SharedState {
                closing: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);

        // Lock briefly to synchronize with waiting threads
        let _guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.shared.condvar.notify_all();
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    /// Sleep for at most `timeout`, returning early when the signal trips.
    ///
    /// Returns `true` if the signal is tripped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.cancelled() {
            return true;
        }
        let guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.cancelled() {
            return true;
        }
        let _ = self
            .shared
            .condvar
            .wait_timeout(guard, timeout)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.cancelled()
    }
}

impl Default for SignalOfStop {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SignalOfStop {
    fn clone(&self) -> SignalOfStop {
        SignalOfStop {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_timeout_elapses() {
        let sos = SignalOfStop::new();
        assert!(!sos.wait_timeout(Duration::from_millis(5)));
        assert!(!sos.cancelled());
    }

    #[test]
    fn test_cancel_wakes_waiters() {
        let sos = SignalOfStop::new();
        let waiter = sos.clone();

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let tripped = waiter.wait_timeout(Duration::from_secs(10));
            (tripped, start.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        sos.cancel();

        let (tripped, elapsed) = handle.join().unwrap();
        assert!(tripped);
        assert!(elapsed < Duration::from_secs(5));
    }
}
