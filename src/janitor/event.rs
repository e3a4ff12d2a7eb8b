//! Manual- and auto-reset events built on `Mutex` + `Condvar`.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A signalable flag threads can wait on.
///
/// A manual-reset event stays signaled until [`Event::reset`]; an
/// auto-reset event is consumed by the waiter it wakes.
#[derive(Debug)]
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
    auto_reset: bool,
}

impl Event {
    pub fn manual_reset() -> Self {
        Self::with_mode(false)
    }

    pub fn auto_reset() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(auto_reset: bool) -> Self {
        Self {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
            auto_reset,
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.signaled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn trigger(&self) {
        *self.lock() = true;
        if self.auto_reset {
            self.cond.notify_one();
        } else {
            self.cond.notify_all();
        }
    }

    pub fn reset(&self) {
        *self.lock() = false;
    }

    /// Wait until signaled. Returns immediately if already signaled.
    pub fn wait(&self) {
        let mut signaled = self.lock();
        while !*signaled {
            signaled = self
                .cond
                .wait(signaled)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if self.auto_reset {
            *signaled = false;
        }
    }

    /// Wait up to `timeout`. Returns `true` if the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut signaled = self.lock();
        while !*signaled {
            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(remaining) if !remaining.is_zero() => remaining,
                    _ => return false,
                },
                // Effectively infinite.
                None => Duration::from_secs(u32::MAX.into()),
            };
            signaled = self
                .cond
                .wait_timeout(signaled, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        if self.auto_reset {
            *signaled = false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_manual_reset_stays_signaled() {
        let event = Event::manual_reset();
        event.trigger();
        assert!(event.wait_timeout(Duration::ZERO));
        assert!(event.wait_timeout(Duration::from_millis(1)));
        event.reset();
        assert!(!event.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_auto_reset_consumed_by_waiter() {
        let event = Event::auto_reset();
        event.trigger();
        assert!(event.wait_timeout(Duration::from_millis(1)));
        assert!(!event.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_trigger_wakes_other_thread() {
        let event = Arc::new(Event::manual_reset());
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        event.trigger();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        let event = Event::auto_reset();
        event.trigger();
        assert!(event.wait_timeout(Duration::MAX));
    }
}
