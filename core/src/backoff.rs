/// Retry delays tried in order before falling back to the exponential
/// formula below, mirroring the fixed early-retry schedule used for
/// callback delivery.
pub const RETRY_DELAYS_MS: [u64; 3] = [1_000, 5_000, 25_000];

/// Cap applied once `attempt` runs past the fixed schedule above.
pub const MAX_BACKOFF_MS: u64 = 300_000;

/// Delay before the given (zero-indexed) retry attempt: the fixed schedule
/// for the first few attempts, then `1000 * 5^attempt` capped at
/// [`MAX_BACKOFF_MS`].
pub fn delay_for_attempt(attempt: usize) -> std::time::Duration {
    let ms = if let Some(&fixed) = RETRY_DELAYS_MS.get(attempt) {
        fixed
    } else {
        1_000u64
            .saturating_mul(5u64.saturating_pow(attempt as u32))
            .min(MAX_BACKOFF_MS)
    };
    std::time::Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_fixed_schedule_for_early_attempts() {
        assert_eq!(delay_for_attempt(0).as_millis(), 1_000);
        assert_eq!(delay_for_attempt(1).as_millis(), 5_000);
        assert_eq!(delay_for_attempt(2).as_millis(), 25_000);
    }

    #[test]
    fn caps_beyond_fixed_schedule() {
        assert_eq!(delay_for_attempt(10).as_millis(), MAX_BACKOFF_MS as u128);
    }
}
