//! Generic retry with pluggable predicate, delay and error callback.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::warn;

/// Passed to every callback after a failed attempt.
pub struct RetryState<'a, E> {
    /// Zero-based index of the attempt that just failed.
    pub index: u32,
    pub elapsed: Duration,
    pub error: &'a E,
}

type Predicate<E> = Box<dyn Fn(&RetryState<'_, E>) -> bool + Send + Sync>;
type Delay<E> = Box<dyn Fn(&RetryState<'_, E>) -> Duration + Send + Sync>;
type OnError<E> = Box<dyn Fn(&RetryState<'_, E>) + Send + Sync>;

pub struct RetryOptions<E> {
    /// Whether to try again after the failed attempt.
    pub retry: Predicate<E>,
    pub delay: Delay<E>,
    /// Invoked once per failed attempt, before the retry decision.
    pub on_error: OnError<E>,
}

/// Ten retries, waiting `(index + 1) × 5s` between attempts, each failure logged.
impl<E: Display + 'static> Default for RetryOptions<E> {
    fn default() -> Self {
        Self {
            retry: Box::new(|s| s.index < 10),
            delay: Box::new(|s| Duration::from_secs(5 * (s.index as u64 + 1))),
            on_error: Box::new(|s| {
                warn!(
                    index = s.index,
                    elapsed_ms = s.elapsed.as_millis() as u64,
                    error = %s.error,
                    "Operation failed"
                );
            }),
        }
    }
}

impl<E: 'static> RetryOptions<E> {
    pub fn max_retries(mut self, max: u32) -> Self {
        self.retry = Box::new(move |s| s.index < max);
        self
    }

    pub fn retry_if(mut self, f: impl Fn(&RetryState<'_, E>) -> bool + Send + Sync + 'static) -> Self {
        self.retry = Box::new(f);
        self
    }

    pub fn fixed_delay(mut self, delay: Duration) -> Self {
        self.delay = Box::new(move |_| delay);
        self
    }

    pub fn on_error(mut self, f: impl Fn(&RetryState<'_, E>) + Send + Sync + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }
}

/// Run `operation` until it succeeds or `options.retry` declines, returning
/// the last error in that case. The operation receives the attempt index.
pub async fn retry<T, E, F, Fut>(mut operation: F, options: &RetryOptions<E>) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut index = 0u32;
    loop {
        match operation(index).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let state = RetryState {
                    index,
                    elapsed: started.elapsed(),
                    error: &error,
                };
                (options.on_error)(&state);
                if !(options.retry)(&state) {
                    return Err(error);
                }
                let delay = (options.delay)(&state);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                index += 1;
            }
        }
    }
}
