//! Interruptible waiting for the submit loop.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A shutdown flag that supports interruptible waits. Unlike
/// `thread::sleep`, a wait on this signal ends as soon as shutdown is
/// triggered.
pub struct ShutdownSignal {
    flag: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Trigger shutdown, waking all waiting threads.
    pub fn trigger(&self) {
        let mut flag = self.flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *flag = true;
        self.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        *self.flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait up to `duration`. Returns true if shutdown was triggered.
    pub fn wait(&self, duration: Duration) -> bool {
        let flag = self.flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (flag, _) = self
            .condvar
            .wait_timeout_while(flag, duration, |done| !*done)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *flag
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_wait_times_out_without_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait(Duration::from_millis(10)));
        assert!(!signal.is_shutdown());
    }

    #[test]
    fn test_trigger_interrupts_wait() {
        let signal = Arc::new(ShutdownSignal::new());
        let trigger_side = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger_side.trigger();
        });

        let start = Instant::now();
        assert!(signal.wait(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_after_trigger_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        assert!(signal.wait(Duration::from_secs(30)));
    }
}
