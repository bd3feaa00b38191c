//! Exponential backoff with jitter around adapter calls.
//!
//! At most 2 additional attempts on retryable errors; fatal errors return
//! immediately. Delay between attempts:
//! `min(8s, 500ms * 2^attempt) + uniform(0, 200ms)`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::ProviderError;

pub const MAX_RETRIES: u32 = 2;
const BASE_DELAY: Duration = Duration::from_millis(500);
const DELAY_CAP: Duration = Duration::from_secs(8);
const JITTER_MS: u64 = 200;

/// Deterministic part of the delay before retry number `attempt` (0-based).
pub fn retry_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt));
    exp.min(DELAY_CAP)
}

fn jittered_delay(attempt: u32) -> Duration {
    retry_delay(attempt) + Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_MS))
}

/// Run `op` with the retry policy. `op` is invoked with the attempt index;
/// the caller keeps key selection fixed across attempts of one trial.
pub async fn with_backoff<T, F, Fut>(label: &str, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                let delay = jittered_delay(attempt);
                debug!(
                    "{label}: attempt {} failed ({err}), retrying in {:?}",
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
