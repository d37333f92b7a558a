//! Blocking event used to hand frames from the capture thread to a consumer
//!
//! Mirrors the classic OS event object: a boolean state guarded by a mutex,
//! with a condition variable for waiters. A manual-reset event stays
//! signaled until [`Event::reset`]; an auto-reset event is cleared by the
//! waiter it releases.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Outcome of a failed [`Event::timed_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("wait timed out")]
    TimedOut,
    #[error("infinite timeout requested through a timed wait")]
    Unsupported,
    #[error("underlying lock failure")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Manual,
    Auto,
}

#[derive(Debug)]
pub struct Event {
    mode: ResetMode,
    state: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    /// Timeout value that means "forever"; rejected by [`Event::timed_wait`].
    pub const INFINITE: Duration = Duration::MAX;

    pub fn new(mode: ResetMode, initially_signaled: bool) -> Self {
        Self {
            mode,
            state: Mutex::new(initially_signaled),
            cond: Condvar::new(),
        }
    }

    pub fn manual(initially_signaled: bool) -> Self {
        Self::new(ResetMode::Manual, initially_signaled)
    }

    pub fn auto(initially_signaled: bool) -> Self {
        Self::new(ResetMode::Auto, initially_signaled)
    }

    pub fn mode(&self) -> ResetMode {
        self.mode
    }

    /// Set the event and wake one (auto) or all (manual) waiters.
    pub fn signal(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !*state {
            *state = true;
            match self.mode {
                ResetMode::Manual => self.cond.notify_all(),
                ResetMode::Auto => self.cond.notify_one(),
            }
        }
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_signaled(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the event is signaled.
    pub fn wait(&self) {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self
            .cond
            .wait_while(guard, |signaled| !*signaled)
            .unwrap_or_else(PoisonError::into_inner);
        if self.mode == ResetMode::Auto {
            *state = false;
        }
    }

    /// Like [`Event::wait`], bounded by `timeout`.
    pub fn timed_wait(&self, timeout: Duration) -> Result<(), WaitError> {
        if timeout == Self::INFINITE {
            return Err(WaitError::Unsupported);
        }
        // An unrepresentable deadline is as good as infinite.
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or(WaitError::Unsupported)?;

        let mut state = self.state.lock().map_err(|_| WaitError::Unknown)?;
        while !*state {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WaitError::TimedOut);
            }
            let (guard, _) = self
                .cond
                .wait_timeout(state, remaining)
                .map_err(|_| WaitError::Unknown)?;
            state = guard;
        }

        if self.mode == ResetMode::Auto {
            *state = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signaled_event_does_not_block() {
        let event = Event::manual(true);
        event.wait();
        assert!(event.is_signaled());
        assert_eq!(event.timed_wait(Duration::from_millis(1)), Ok(()));
    }

    #[test]
    fn test_auto_reset_clears_on_wait() {
        let event = Event::auto(false);
        event.signal();
        event.wait();
        assert!(!event.is_signaled());
        assert_eq!(
            event.timed_wait(Duration::from_millis(10)),
            Err(WaitError::TimedOut)
        );
    }

    #[test]
    fn test_reset_clears_manual_event() {
        let event = Event::manual(false);
        event.signal();
        event.reset();
        assert!(!event.is_signaled());
    }

    #[test]
    fn test_infinite_timed_wait_is_unsupported() {
        let event = Event::auto(true);
        assert_eq!(event.timed_wait(Event::INFINITE), Err(WaitError::Unsupported));
        // The state is untouched by the rejected call.
        assert!(event.is_signaled());
    }

    #[test]
    fn test_timed_wait_returns_after_signal_from_other_thread() {
        let event = Arc::new(Event::auto(false));
        let signaller = Arc::clone(&event);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal();
        });

        assert_eq!(event.timed_wait(Duration::from_secs(5)), Ok(()));
        handle.join().expect("signaller thread panicked");
    }
}
