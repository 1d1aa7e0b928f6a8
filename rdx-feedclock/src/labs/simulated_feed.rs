//! An in-process stand-in for the tracking server.
//!
//! The server keeps a rolling buffer of the most recent samples (30 seconds
//! by default) and answers every poll with the samples newer than the
//! client's `last_timestamp`, plus its current rate. This module produces
//! synthetic samples in real (tokio) time and serves them the same way, with
//! knobs for the things that make a live feed unpleasant: latency and jitter,
//! dropped requests, production stalls followed by bursts, and rate changes.
//!
//! Responses go through the JSON wire format on the way out, so a session fed
//! by this transport exercises the same decoding path as a network client.

use crate::common::{FeedRate, FetchCursor};
use crate::error::FeedError;
use crate::sample::{BallPosition, RodState, Sample, TablePayload, RODS_PER_TEAM};
use crate::transport::{FeedResponse, Transport};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Knobs of a simulated feed.
#[derive(Debug, Clone)]
pub struct SimulatedFeedSettings {
    pub rate: FeedRate,
    /// How much history the server keeps.
    pub buffer_secs: f64,
    /// Timestamp of the first produced sample.
    pub start_timestamp: f64,
    /// Fixed part of the response delay.
    pub latency: Duration,
    /// Random extra delay, uniform in `[0, jitter]`.
    pub jitter: Duration,
    /// Probability that a request fails outright.
    pub failure_rate: f64,
    /// Probability that a sample carries no ball position.
    pub ball_dropout: f64,
    /// Fixed RNG seed, for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulatedFeedSettings {
    fn default() -> Self {
        Self {
            rate: FeedRate::default(),
            buffer_secs: 30.0,
            start_timestamp: 0.0,
            latency: Duration::from_millis(40),
            jitter: Duration::from_millis(60),
            failure_rate: 0.0,
            ball_dropout: 0.05,
            seed: None,
        }
    }
}

/// What the simulated server currently looks like.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub rate: FeedRate,
    pub buffered: usize,
    pub newest: Option<f64>,
    pub stalled_for: Option<Duration>,
    pub latency: Duration,
    pub jitter: Duration,
    pub failure_rate: f64,
    pub requests: u64,
}

#[derive(Debug)]
struct Stall {
    frozen_at: f64,
    until: Instant,
}

#[derive(Debug)]
struct FeedState {
    settings: SimulatedFeedSettings,
    origin: Instant,
    next_timestamp: f64,
    buffer: VecDeque<Sample>,
    stall: Option<Stall>,
    rng: StdRng,
    requests: u64,
}

impl FeedState {
    /// The newest sample-time the producer has reached by `now`.
    fn horizon(&self, now: Instant) -> f64 {
        self.settings.start_timestamp + now.saturating_duration_since(self.origin).as_secs_f64()
    }

    /// Produces every sample due by `now` into the rolling buffer.
    fn produce(&mut self, now: Instant) {
        let mut horizon = self.horizon(now);
        if let Some(stall) = &self.stall {
            if now < stall.until {
                horizon = horizon.min(stall.frozen_at);
            } else {
                debug!("Simulated stall over.");
                self.stall = None;
            }
        }

        let step = 1.0 / self.settings.rate.samples_per_sec();
        while self.next_timestamp <= horizon {
            let sample = self.synthesize(self.next_timestamp);
            self.buffer.push_back(sample);
            self.next_timestamp += step;
        }

        let capacity = self.settings.rate.samples_in(self.settings.buffer_secs).max(1);
        while self.buffer.len() > capacity {
            self.buffer.pop_front();
        }
    }

    /// A plausible scene: the ball wanders on a Lissajous curve, rods sway.
    fn synthesize(&mut self, t: f64) -> Sample {
        let dropout = self.settings.ball_dropout.clamp(0.0, 1.0);
        let ball = (!self.rng.gen_bool(dropout)).then(|| BallPosition {
            x: 0.5 * (0.7 * t).sin(),
            y: 0.3 * (1.1 * t).cos(),
        });
        let rod = |phase: f64| RodState {
            shift: Some(0.1 * (t + phase).sin()),
            angle: Some((2.0 * t + phase).sin()),
        };
        let mut payload = TablePayload {
            ball,
            ..TablePayload::default()
        };
        for i in 0..RODS_PER_TEAM {
            payload.red[i] = rod(i as f64);
            payload.blue[i] = rod(i as f64 + 0.5);
        }
        Sample::new(t, payload)
    }

    fn delay(&mut self) -> Duration {
        let jitter = self.settings.jitter.as_secs_f64();
        let extra = if jitter > 0.0 {
            self.rng.gen_range(0.0..=jitter)
        } else {
            0.0
        };
        self.settings.latency + Duration::from_secs_f64(extra)
    }

    fn respond(&self, cursor: FetchCursor) -> FeedResponse {
        let samples = self
            .buffer
            .iter()
            .filter(|s| cursor.admits(s.timestamp))
            .cloned()
            .collect();
        FeedResponse {
            rate: self.settings.rate.samples_per_sec(),
            samples,
            buffer_len: Some(self.settings.rate.samples_in(self.settings.buffer_secs)),
            version: Some(1),
        }
    }
}

/// A [`Transport`] backed by an in-process synthetic server.
#[derive(Debug, Clone)]
pub struct SimulatedFeed {
    state: Arc<Mutex<FeedState>>,
}

impl SimulatedFeed {
    pub fn new(settings: SimulatedFeedSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = FeedState {
            origin: Instant::now(),
            next_timestamp: settings.start_timestamp,
            buffer: VecDeque::new(),
            stall: None,
            rng,
            requests: 0,
            settings,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A handle for changing the feed's behavior while it is being polled.
    pub fn control(&self) -> FeedControl {
        FeedControl {
            state: self.state.clone(),
        }
    }
}

#[async_trait]
impl Transport for SimulatedFeed {
    async fn fetch(&self, cursor: FetchCursor) -> Result<FeedResponse, FeedError> {
        let (delay, body) = {
            let mut state = self.state.lock().await;
            state.requests += 1;
            state.produce(Instant::now());
            let delay = state.delay();
            let failure_rate = state.settings.failure_rate;
            let body = if failure_rate > 0.0 && state.rng.gen_bool(failure_rate.min(1.0)) {
                Err(FeedError::Transport(
                    "simulated connection reset".to_string(),
                ))
            } else {
                state.respond(cursor).to_json()
            };
            (delay, body)
        };

        tokio::time::sleep(delay).await;
        FeedResponse::from_json(&body?)
    }
}

/// Adjusts a running [`SimulatedFeed`].
#[derive(Debug, Clone)]
pub struct FeedControl {
    state: Arc<Mutex<FeedState>>,
}

impl FeedControl {
    /// Switches the production rate. Samples already produced are kept.
    pub async fn set_rate(&self, rate: FeedRate) {
        let mut state = self.state.lock().await;
        state.produce(Instant::now());
        info!(from = %state.settings.rate, to = %rate, "Simulated feed rate changed.");
        state.settings.rate = rate;
    }

    /// Stops publishing new samples for `duration`. Production carries on in
    /// the background, so everything shows up at once when the stall ends.
    pub async fn stall(&self, duration: Duration) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.produce(now);
        let frozen_at = match &state.stall {
            Some(stall) => stall.frozen_at,
            None => state.horizon(now),
        };
        info!(?duration, "Simulated feed stalled.");
        state.stall = Some(Stall {
            frozen_at,
            until: now + duration,
        });
    }

    pub async fn set_latency(&self, latency: Duration, jitter: Duration) {
        let mut state = self.state.lock().await;
        state.settings.latency = latency;
        state.settings.jitter = jitter;
    }

    /// Sets the probability, clamped to `[0, 1]`, that a request fails.
    pub async fn set_failure_rate(&self, failure_rate: f64) {
        let mut state = self.state.lock().await;
        state.settings.failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.produce(now);
        FeedSnapshot {
            rate: state.settings.rate,
            buffered: state.buffer.len(),
            newest: state.buffer.back().map(|s| s.timestamp),
            stalled_for: state
                .stall
                .as_ref()
                .map(|stall| stall.until.saturating_duration_since(now)),
            latency: state.settings.latency,
            jitter: state.settings.jitter,
            failure_rate: state.settings.failure_rate,
            requests: state.requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Four samples per second keeps every timestamp exact.
    fn quiet_feed_settings() -> SimulatedFeedSettings {
        SimulatedFeedSettings {
            rate: FeedRate::new(4.0).unwrap(),
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            seed: Some(7),
            ..SimulatedFeedSettings::default()
        }
    }

    fn quiet_feed() -> SimulatedFeed {
        SimulatedFeed::new(quiet_feed_settings())
    }

    fn timestamps(response: &FeedResponse) -> Vec<f64> {
        response.samples.iter().map(|s| s.timestamp).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn serves_everything_newer_than_the_cursor() {
        let feed = quiet_feed();
        tokio::time::advance(Duration::from_secs(1)).await;
        let first = feed.fetch(FetchCursor::FromStart).await.unwrap();
        assert_eq!(timestamps(&first), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(first.rate, 4.0);

        tokio::time::advance(Duration::from_secs(1)).await;
        let second = feed.fetch(FetchCursor::After(1.0)).await.unwrap();
        assert_eq!(timestamps(&second), vec![1.25, 1.5, 1.75, 2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_a_rolling_buffer() {
        let feed = SimulatedFeed::new(SimulatedFeedSettings {
            buffer_secs: 1.0,
            ..quiet_feed_settings()
        });
        tokio::time::advance(Duration::from_secs(10)).await;
        let response = feed.fetch(FetchCursor::FromStart).await.unwrap();
        assert_eq!(timestamps(&response), vec![9.25, 9.5, 9.75, 10.0]);
        assert_eq!(response.buffer_len, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn stall_then_burst() {
        let feed = quiet_feed();
        let control = feed.control();
        tokio::time::advance(Duration::from_secs(1)).await;
        feed.fetch(FetchCursor::FromStart).await.unwrap();

        control.stall(Duration::from_secs(2)).await;
        tokio::time::advance(Duration::from_millis(1500)).await;
        let during = feed.fetch(FetchCursor::After(1.0)).await.unwrap();
        assert!(during.samples.is_empty());
        assert!(control.snapshot().await.stalled_for.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        let after = feed.fetch(FetchCursor::After(1.0)).await.unwrap();
        assert_eq!(after.samples.len(), 10);
        assert_eq!(after.samples.last().map(|s| s.timestamp), Some(3.5));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_rate_changes() {
        let feed = quiet_feed();
        feed.control().set_rate(FeedRate::new(8.0).unwrap()).await;
        let response = feed.fetch(FetchCursor::FromStart).await.unwrap();
        assert_eq!(response.rate, 8.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_requests_are_transport_errors() {
        let feed = quiet_feed();
        feed.control().set_failure_rate(1.0).await;
        assert!(matches!(
            feed.fetch(FetchCursor::FromStart).await,
            Err(FeedError::Transport(_))
        ));
        assert_eq!(feed.control().snapshot().await.requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_the_answer() {
        let feed = SimulatedFeed::new(SimulatedFeedSettings {
            latency: Duration::from_millis(300),
            ..quiet_feed_settings()
        });
        let started = Instant::now();
        feed.fetch(FetchCursor::FromStart).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
