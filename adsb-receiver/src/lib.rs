//! adsb-receiver: live multi-source ADS-B ingestion on top of `adsb-core`.
//!
//! Each configured source runs its own tokio task (TCP read loop or HTTP
//! poll loop). Decoded updates funnel through one channel into the
//! [`Coordinator`], which owns the aircraft store and the alert engine and
//! publishes the sorted view, combined status and alerts on watch/broadcast
//! channels.

pub mod backoff;
pub mod connection;
pub mod coordinator;
pub mod provider;
pub mod watcher;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use adsb_core::config::MAX_INTERVAL_SECS;

pub use coordinator::{CombinedStatus, Coordinator};
pub use provider::{Provider, ProviderMessage};

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Interval setting as a `Duration`, clamped to `min..=MAX_INTERVAL_SECS`.
/// NaN and infinities map to `fallback`.
pub fn interval_from_secs(secs: f64, min: f64, fallback: f64) -> Duration {
    let secs = if secs.is_finite() { secs } else { fallback };
    Duration::from_secs_f64(secs.clamp(min, MAX_INTERVAL_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_secs() {
        assert_eq!(interval_from_secs(2.5, 0.05, 1.0), Duration::from_millis(2500));
        assert_eq!(interval_from_secs(0.0, 0.05, 1.0), Duration::from_millis(50));
        assert_eq!(interval_from_secs(-3.0, 0.05, 1.0), Duration::from_millis(50));
        assert_eq!(interval_from_secs(f64::INFINITY, 0.01, 10.0), Duration::from_secs(10));
        assert_eq!(interval_from_secs(f64::NAN, 0.01, 10.0), Duration::from_secs(10));
        assert_eq!(interval_from_secs(1e300, 0.01, 10.0), Duration::from_secs(86_400));
    }
}
