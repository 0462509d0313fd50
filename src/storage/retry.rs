//! Bounded retry for filesystem calls.
//!
//! Some IO failures are momentary (an interrupted syscall, a file briefly
//! held open by a virus scanner). Those are retried a fixed number of times
//! with a short linear delay, then surfaced to the caller. Nothing here
//! blocks for longer than `max_attempts * delay`.

use std::io;
use std::time::Duration;

/// Retry policy for a storage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRetry {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl IoRetry {
    /// Three attempts, 50 ms apart.
    pub const DEFAULT: Self = Self {
        max_attempts: 3,
        delay: Duration::from_millis(50),
    };

    /// A single attempt.
    pub const NONE: Self = Self {
        max_attempts: 1,
        delay: Duration::ZERO,
    };

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub fn run<T>(&self, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_transient(&e) => {
                    tracing::trace!(attempt, error = %e, "Retrying storage operation");
                    attempt += 1;
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for IoRetry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Whether an IO error is worth retrying.
pub fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ResourceBusy
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const FAST: IoRetry = IoRetry {
        max_attempts: 3,
        delay: Duration::ZERO,
    };

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = FAST.run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(io::Error::from(io::ErrorKind::Interrupted))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: io::Result<()> = FAST.run(|| {
            calls.set(calls.get() + 1);
            Err(io::Error::from(io::ErrorKind::WouldBlock))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: io::Result<()> = FAST.run(|| {
            calls.set(calls.get() + 1);
            Err(io::Error::from(io::ErrorKind::NotFound))
        });
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn none_policy_runs_once() {
        let calls = Cell::new(0);
        let _: io::Result<()> = IoRetry::NONE.run(|| {
            calls.set(calls.get() + 1);
            Err(io::Error::from(io::ErrorKind::Interrupted))
        });
        assert_eq!(calls.get(), 1);
    }
}
