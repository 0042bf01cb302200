//! Retry-pattern matching and backoff scheduling for the Plexus engine.

mod backoff;
mod matcher;

pub use backoff::backoff_delays;
pub use matcher::RetryMatcher;
