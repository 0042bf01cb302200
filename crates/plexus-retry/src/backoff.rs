//! Exponential backoff with jitter (§3 "RetryPolicy", §4.E, §8 invariant 6).

use rand::Rng;

/// Compute the sequence of `retries` backoff delays in milliseconds.
///
/// For attempt `i in [0, retries)`: `delay_i = backoff_ms * 2^i +
/// Uniform(0, jitter_ms)`. `jitter_ms == 0` contributes no jitter.
pub fn backoff_delays(retries: u32, backoff_ms: u64, jitter_ms: u64) -> Vec<f64> {
    let mut rng = rand::thread_rng();
    (0..retries)
        .map(|attempt| {
            let base = backoff_ms as f64 * 2f64.powi(attempt as i32);
            let jitter = if jitter_ms > 0 { rng.gen_range(0.0..jitter_ms as f64) } else { 0.0 };
            base + jitter
        })
        .collect()
}
