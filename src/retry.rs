//! Bounded retry for flaky remote operations.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_ATTEMPTS: usize = 3;

/// Run `op` up to `attempts` times (at least once), sleeping `delay` between tries.
/// Returns the first success or the last error.
pub async fn with_retries<T, E, F, Fut>(
  attempts: usize,
  delay: Duration,
  label: &str,
  mut op: F,
) -> Result<T, E>
where
  E: Display,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  let attempts = attempts.max(1);
  let mut attempt = 1;

  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) => {
        warn!(label, attempt, error = %e, "attempt failed");
        if attempt >= attempts {
          return Err(e);
        }
      }
    }

    info!(label, "retrying");
    attempt += 1;
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
  }
}
