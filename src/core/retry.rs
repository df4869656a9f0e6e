use std::time::Duration;
use tracing::warn;

use crate::core::error::FilesetResult;

/// Waits between two attempts. Tests substitute an implementation that only
/// records the requested delays.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Bounded retry with a fixed interval between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A policy that retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Runs `op` until it succeeds, fails with a non-recoverable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, sleeper: &dyn Sleeper, what: &str, mut op: F) -> FilesetResult<T>
    where
        F: FnMut(u32) -> FilesetResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_recoverable() && attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        "{what} failed (Attempt {attempt} of {max_attempts})"
                    );
                    sleeper.sleep(self.backoff);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Sleeper;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records delays instead of sleeping.
    #[derive(Debug, Default)]
    pub struct RecordingSleeper {
        pub waits: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn count(&self) -> usize {
            self.waits.lock().unwrap().len()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSleeper;
    use super::*;
    use crate::core::error::FilesetError;
    use std::io;
    use std::path::PathBuf;

    fn transient() -> FilesetError {
        FilesetError::io("share", io::Error::other("network name no longer available"))
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::new(5, Duration::from_secs(10));

        let mut calls = 0;
        let value = policy
            .run(&sleeper, "copy", |attempt| {
                calls += 1;
                if attempt < 3 { Err(transient()) } else { Ok(attempt) }
            })
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls, 3);
        assert_eq!(
            *sleeper.waits.lock().unwrap(),
            vec![Duration::from_secs(10), Duration::from_secs(10)]
        );
    }

    #[test]
    fn test_last_error_propagates_after_budget() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let err = RetryPolicy::immediate(5)
            .run(&sleeper, "copy", |_| -> FilesetResult<()> {
                calls += 1;
                Err(transient())
            })
            .unwrap_err();

        assert!(matches!(err, FilesetError::Io { .. }));
        assert_eq!(calls, 5);
        assert_eq!(sleeper.count(), 4);
    }

    #[test]
    fn test_fatal_errors_are_not_retried() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let err = RetryPolicy::default()
            .run(&sleeper, "archive", |_| -> FilesetResult<()> {
                calls += 1;
                Err(FilesetError::NoFilesMatched {
                    target: PathBuf::from("a.zip"),
                })
            })
            .unwrap_err();

        assert!(matches!(err, FilesetError::NoFilesMatched { .. }));
        assert_eq!(calls, 1);
        assert_eq!(sleeper.count(), 0);
    }
}
