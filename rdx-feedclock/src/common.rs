//! Contains common, primitive types shared across the crate.
//!
//! Using distinct types for the feed rate and the fetch cursor keeps the
//! sample-time arithmetic in the selector from mixing up units.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Samples per second reported by the feed.
///
/// The render tick period is derived from it, so the rate is always positive
/// and finite, and `1/rate` is a non-zero `Duration`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct FeedRate(f64);

impl FeedRate {
    /// Validates and wraps a rate in samples per second.
    pub fn new(samples_per_sec: f64) -> Result<Self, ConfigError> {
        let period = (samples_per_sec.is_finite() && samples_per_sec > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / samples_per_sec).ok())
            .flatten();
        match period {
            Some(period) if !period.is_zero() => Ok(Self(samples_per_sec)),
            _ => Err(ConfigError::out_of_range(
                "rate",
                "a positive number of samples per second with a representable tick period",
                samples_per_sec,
            )),
        }
    }

    pub fn samples_per_sec(self) -> f64 {
        self.0
    }

    /// The wall-clock period between two render ticks.
    pub fn tick_period(self) -> Duration {
        Duration::from_secs_f64(1.0 / self.0)
    }

    /// How many samples `secs` seconds of feed contain at this rate.
    pub fn samples_in(self, secs: f64) -> usize {
        (secs * self.0).round().max(0.0) as usize
    }
}

impl Default for FeedRate {
    fn default() -> Self {
        Self(30.0)
    }
}

impl TryFrom<f64> for FeedRate {
    type Error = ConfigError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        FeedRate::new(value)
    }
}

impl From<FeedRate> for f64 {
    fn from(rate: FeedRate) -> Self {
        rate.0
    }
}

impl fmt::Display for FeedRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sps", self.0)
    }
}

/// Lower bound handed to the transport on each request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchCursor {
    /// Nothing has been appended yet; ask for everything the server holds.
    FromStart,
    /// Ask only for samples strictly newer than this timestamp.
    After(f64),
}

impl FetchCursor {
    /// The value of the `last_timestamp` query parameter for this cursor.
    ///
    /// Timestamps are rendered with a fixed six decimal places.
    pub fn to_query_value(self) -> String {
        match self {
            FetchCursor::FromStart => "0".to_string(),
            FetchCursor::After(ts) => format!("{ts:.6}"),
        }
    }

    /// Returns `true` if `timestamp` lies beyond this cursor.
    pub fn admits(self, timestamp: f64) -> bool {
        match self {
            FetchCursor::FromStart => true,
            FetchCursor::After(ts) => timestamp > ts,
        }
    }
}

impl fmt::Display for FetchCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_rejects_non_positive_values() {
        assert!(FeedRate::new(0.0).is_err());
        assert!(FeedRate::new(-30.0).is_err());
        assert!(FeedRate::new(f64::NAN).is_err());
        assert!(FeedRate::new(f64::INFINITY).is_err());
    }

    #[test]
    fn rate_rejects_unrepresentable_tick_periods() {
        assert!(FeedRate::new(1e-30).is_err());
        assert!(FeedRate::new(1e300).is_err());
        assert!(FeedRate::new(0.01).is_ok());
    }

    #[test]
    fn rate_derives_tick_period() {
        let rate = FeedRate::new(4.0).unwrap();
        assert_eq!(rate.tick_period(), Duration::from_millis(250));
        assert_eq!(rate.samples_in(10.0), 40);
    }

    #[test]
    fn cursor_renders_sentinel_and_fixed_precision() {
        assert_eq!(FetchCursor::FromStart.to_query_value(), "0");
        assert_eq!(
            FetchCursor::After(1_700_000_000.25).to_query_value(),
            "1700000000.250000"
        );
    }

    #[test]
    fn cursor_admits_only_newer_samples() {
        let cursor = FetchCursor::After(10.0);
        assert!(!cursor.admits(10.0));
        assert!(cursor.admits(10.001));
        assert!(FetchCursor::FromStart.admits(-5.0));
    }
}
