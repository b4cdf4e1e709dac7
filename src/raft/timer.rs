use rand::Rng;
use std::time::Duration;

/// Election timeout of `base_ms` plus a uniformly random jitter in `[0, jitter_ms)`.
pub fn random_election_timeout(base_ms: u64, jitter_ms: u64) -> Duration {
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..jitter_ms)
    };
    Duration::from_millis(base_ms + jitter)
}
