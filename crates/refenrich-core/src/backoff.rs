//! Exponential backoff shared by every retry loop that talks to an external
//! service (the search client's rate-limit/transient-error retries and the
//! ranker's halved-batch retry).

use std::time::Duration;

use tokio::time::sleep;

/// Cap the exponent so a flaky dependency never sleeps for hours.
const MAX_ATTEMPT: u32 = 6;

/// Delay for retry attempt `attempt` (0-indexed): `2^attempt` seconds, capped
/// at `2^MAX_ATTEMPT`.
#[must_use]
pub fn delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.min(MAX_ATTEMPT))
}

/// Sleep for [`delay`]`(attempt)`.
pub async fn wait(attempt: u32) {
    sleep(delay(attempt)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_each_attempt() {
        assert_eq!(delay(0), Duration::from_secs(1));
        assert_eq!(delay(1), Duration::from_secs(2));
        assert_eq!(delay(2), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped_at_max_attempt() {
        assert_eq!(delay(MAX_ATTEMPT), delay(MAX_ATTEMPT + 10));
    }
}
