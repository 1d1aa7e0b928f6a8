//! Defines all configuration structures for a feedclock session.
//!
//! These structs are designed to be deserialized from a configuration file
//! (e.g., a TOML file) using `serde`, layered with `FEEDCLOCK__*` environment
//! overrides through the `config` crate. Every field has a default, so an
//! empty file (or no file at all) yields a working session.

use crate::common::FeedRate;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// The top-level configuration for a `PlaybackSession` and its engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedClockConfig {
    /// Seconds between two fetch ticks. Independent of the sample rate.
    pub fetch_period_secs: f64,

    /// Upper bound on a single request before it counts as failed.
    pub request_timeout_secs: f64,

    /// The sample rate assumed until the feed reports its own.
    pub initial_rate: FeedRate,

    /// Which frame selection policy drives playback.
    pub policy: SelectionPolicy,

    pub cadence: CadenceConfig,

    pub warp: WarpConfig,

    pub trim: TrimConfig,
}

/// Chooses how the frame selector turns the buffer into a display stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// A virtual playback clock warped toward a target buffer depth.
    #[default]
    Warp,
    /// A wall-to-sample offset trimmed against backlog caps.
    Trim,
}

/// Sizing of the target buffer depth.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Weight of the newest batch in the moving average (alpha).
    pub smoothing: f64,

    /// How many average fetch chunks the buffer should hold (beta).
    pub depth_multiplier: f64,

    /// Starting average. Defaults to twice the fetch period.
    pub initial_average_secs: Option<f64>,

    /// Consecutive refill batches after which the estimate is flagged as stalled.
    pub stall_after_refills: u32,
}

/// Parameters of the warped-clock policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarpConfig {
    /// Proportional gain between relative depth error and warp (k).
    pub gain: f64,

    /// Maximum deviation of the warp factor from 1.0 (m).
    pub clamp: f64,

    /// A selected sample further ahead than this forces a clock snap.
    pub max_skip_secs: f64,
}

/// Parameters of the trim-and-advance policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    /// The oldest sample may lead playback by at most this much before a jump.
    pub lateness_secs: f64,

    /// Backlog (in seconds of samples at the current rate) that triggers gradual catch-up.
    pub soft_backlog_secs: f64,

    /// Backlog that is shed instantly down to the soft cap.
    pub hard_backlog_secs: f64,

    /// Catch-up step per excess second of backlog.
    pub catchup_gain: f64,

    /// Smallest catch-up step, so that a soft-cap overrun always makes progress.
    pub min_catchup_secs: f64,
}

impl Default for FeedClockConfig {
    fn default() -> Self {
        Self {
            fetch_period_secs: 0.5,
            request_timeout_secs: 2.0,
            initial_rate: FeedRate::default(),
            policy: SelectionPolicy::default(),
            cadence: CadenceConfig::default(),
            warp: WarpConfig::default(),
            trim: TrimConfig::default(),
        }
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.1,
            depth_multiplier: 4.0,
            initial_average_secs: None,
            stall_after_refills: 8,
        }
    }
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            gain: 0.3,
            clamp: 0.2,
            max_skip_secs: 1.0,
        }
    }
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            lateness_secs: 0.5,
            soft_backlog_secs: 10.0,
            hard_backlog_secs: 20.0,
            catchup_gain: 0.05,
            min_catchup_secs: 0.001,
        }
    }
}

impl FeedClockConfig {
    /// Loads a configuration from an optional TOML file, then applies
    /// `FEEDCLOCK__*` environment overrides (e.g. `FEEDCLOCK__WARP__GAIN=0.5`).
    ///
    /// The result is validated before it is returned.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let loaded: FeedClockConfig = builder
            .add_source(
                config::Environment::with_prefix("FEEDCLOCK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// The fetch tick period.
    pub fn fetch_period(&self) -> Duration {
        Duration::from_secs_f64(self.fetch_period_secs)
    }

    /// The per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    /// The cadence average a fresh session starts from.
    pub fn initial_cadence_average(&self) -> f64 {
        self.cadence
            .initial_average_secs
            .unwrap_or(2.0 * self.fetch_period_secs)
    }

    /// Rejects values that would produce division by zero or nonsensical warp.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("fetch_period_secs", self.fetch_period_secs)?;
        positive("request_timeout_secs", self.request_timeout_secs)?;

        let alpha = self.cadence.smoothing;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::out_of_range(
                "cadence.smoothing",
                "in (0, 1]",
                alpha,
            ));
        }
        positive("cadence.depth_multiplier", self.cadence.depth_multiplier)?;
        positive(
            "cadence.initial_average_secs",
            self.initial_cadence_average(),
        )?;

        positive("warp.gain", self.warp.gain)?;
        let clamp = self.warp.clamp;
        if !(clamp > 0.0 && clamp < 1.0) {
            return Err(ConfigError::out_of_range("warp.clamp", "in (0, 1)", clamp));
        }
        positive("warp.max_skip_secs", self.warp.max_skip_secs)?;

        positive("trim.lateness_secs", self.trim.lateness_secs)?;
        positive("trim.soft_backlog_secs", self.trim.soft_backlog_secs)?;
        positive("trim.hard_backlog_secs", self.trim.hard_backlog_secs)?;
        if self.trim.hard_backlog_secs < self.trim.soft_backlog_secs {
            return Err(ConfigError::InvertedBacklogCaps {
                soft: self.trim.soft_backlog_secs,
                hard: self.trim.hard_backlog_secs,
            });
        }
        positive("trim.catchup_gain", self.trim.catchup_gain)?;
        positive("trim.min_catchup_secs", self.trim.min_catchup_secs)?;
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(
            field,
            "a positive, finite number",
            value,
        ))
    }
}
