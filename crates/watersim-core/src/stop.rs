//! Interrupt signal observed by the bridge loop.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// A cloneable stop flag whose waiters wake as soon as it is raised.
///
/// The bridge checks it before every iteration and sleeps on it between
/// iterations, so an interrupt during the pacing sleep is honored at once.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter.
    pub fn raise(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`. Returns `true` if the signal was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn starts_lowered() {
        let signal = StopSignal::new();
        assert!(!signal.is_raised());
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn clones_share_state() {
        let signal = StopSignal::new();
        signal.clone().raise();
        assert!(signal.is_raised());
        assert!(signal.wait_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn raise_wakes_a_sleeping_waiter() {
        let signal = StopSignal::new();
        let remote = signal.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.raise();
        });
        assert!(signal.wait_timeout(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(30));
        handle.join().unwrap();
    }
}
