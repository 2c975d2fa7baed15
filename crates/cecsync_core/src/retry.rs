use std::thread::sleep;
use std::time::Duration;

use anyhow::{Result, bail};
use log::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: usize, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

/// Run `operation` up to `policy.attempts` times, sleeping the fixed
/// delay between attempts. `Ok(Some(_))` ends the loop; `Ok(None)` and
/// `Err` count as failed attempts. Exhausting the budget is an error
/// naming the operation, so a hung remote can never spin forever.
pub fn retry_until<T, F>(policy: RetryPolicy, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    let mut last_error = None;
    for attempt in 1..=policy.attempts {
        match operation() {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                warn!(
                    "{what} not ready (attempt {attempt}/{}), retrying in {}s",
                    policy.attempts,
                    policy.delay.as_secs()
                );
            }
            Err(error) => {
                warn!(
                    "{what} failed (attempt {attempt}/{}): {error}",
                    policy.attempts
                );
                last_error = Some(error);
            }
        }
        if attempt < policy.attempts {
            sleep(policy.delay);
        }
    }

    match last_error {
        Some(error) => Err(error.context(format!(
            "{what} exhausted {} attempts",
            policy.attempts
        ))),
        None => bail!("{what} exhausted {} attempts", policy.attempts),
    }
}
