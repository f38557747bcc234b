use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, warn};

/// Controls how [`with_backoff`] spaces out repeated attempts.
///
/// Mirrors the retry/backoff knobs the sorting service keeps in its own
/// configuration (attempt counts and a millisecond delay); this is the
/// same shape made reusable across call sites that need to retry a
/// transient filesystem operation.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    /// Maximum number of attempts, including the first.
    pub attempts: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every failed attempt.
    pub multiplier: f64,
}

impl Backoff {
    pub fn new(attempts: usize, initial_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay,
            multiplier: 2.0,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

/// Retries `op` up to `backoff.attempts` times, sleeping with exponential
/// backoff between attempts. Returns the last error if every attempt fails.
pub fn with_backoff<T, E, F>(backoff: Backoff, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Result<T, E>,
{
    let mut delay = backoff.initial_delay;
    let mut last_err = None;
    for attempt in 0..backoff.attempts {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt + 1 < backoff.attempts {
                    warn!(
                        "Attempt {}/{} failed, retrying in {:?}",
                        attempt + 1,
                        backoff.attempts,
                        delay
                    );
                    sleep(delay);
                    delay = delay.mul_f64(backoff.multiplier);
                } else {
                    debug!("Attempt {}/{} failed, no attempts left", attempt + 1, backoff.attempts);
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one attempt is always made"))
}
