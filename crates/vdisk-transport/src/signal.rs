use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A named-event-like signal used by the shared-memory transport.
///
/// The original driver uses Win32 named event objects (`<base>_Request`,
/// `<base>_Response`) so a client and a server process can rendezvous over
/// a mapped region. This crate models the same auto-reset-event semantics
/// with a portable `Mutex<bool> + Condvar` pair (see `DESIGN.md` OQ-1); a
/// platform-specific named-event-backed signal is a drop-in replacement
/// that is not required to satisfy this spec.
#[derive(Debug, Clone)]
pub struct Signal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Sets the signal and wakes one waiter. Idempotent between waits.
    pub fn signal(&self) {
        let (lock, cvar) = &*self.inner;
        let mut set = lock.lock().unwrap();
        *set = true;
        cvar.notify_all();
    }

    /// True if the signal is currently set, without consuming it.
    pub fn is_set(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Blocks until the signal is set, then consumes it (auto-reset).
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut set = lock.lock().unwrap();
        while !*set {
            set = cvar.wait(set).unwrap();
        }
        *set = false;
    }

    /// Blocks on this signal and `other` together; returns `true` if this
    /// signal woke first, `false` if `other` did. Used for the
    /// `(response, cancel)` wait pair on the shared-memory transport.
    ///
    /// Polls with a short sleep rather than a true multi-wait, since
    /// `std::sync::Condvar` has no `wait_any`; this is the same tradeoff
    /// the shared-memory transport accepts in exchange for portability.
    pub fn wait_with(&self, other: &Signal) -> bool {
        loop {
            if other.is_set() {
                return false;
            }
            if self.wait_timeout(Duration::from_millis(1)) {
                return true;
            }
        }
    }

    /// Blocks for up to `timeout`; returns `true` and consumes the signal
    /// if it fired, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let set = lock.lock().unwrap();
        let (mut set, result) = cvar.wait_timeout(set, timeout).unwrap();
        if *set && !result.timed_out() {
            *set = false;
            return true;
        }
        if *set {
            // Spurious wake right at the timeout boundary; still consume it.
            *set = false;
            return true;
        }
        false
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
