//! A single playback session: one buffer, one estimator, one selector and
//! one fetch slot, owned together.

use crate::common::{FeedRate, FetchCursor};
use crate::components::buffer::ArrivalBuffer;
use crate::components::cadence::CadenceEstimator;
use crate::components::fetcher::FetchScheduler;
use crate::components::selector::FrameSelector;
use crate::config::FeedClockConfig;
use crate::error::FeedError;
use crate::events::{SyncEvent, SyncStatus};
use crate::sample::Sample;
use crate::transport::FeedResponse;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SYNC_CHANNEL_CAPACITY: usize = 256;

/// What happened to a completed fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The batch was appended.
    Applied {
        appended: usize,
        buffered: usize,
        /// The batch landed in an empty buffer.
        refill: bool,
        /// Set if the response carried a new rate and playback was restarted.
        restarted: Option<FeedRate>,
    },
    /// The request or its response was unusable. Nothing changed except the
    /// request slot, which is free again.
    Failed(FeedError),
}

/// The synchronization state of one feed, from arrival to display.
///
/// Everything here is mutated from a single task. The engine wraps it in a
/// mutex and holds the lock for a whole tick.
#[derive(Debug)]
pub struct PlaybackSession {
    config: FeedClockConfig,
    rate: FeedRate,
    buffer: ArrivalBuffer,
    cadence: CadenceEstimator,
    selector: FrameSelector,
    fetcher: FetchScheduler,
    sync_events: broadcast::Sender<SyncEvent>,
}

impl PlaybackSession {
    /// Creates a session, rejecting an invalid configuration up front.
    pub fn new(config: FeedClockConfig) -> Result<Self, FeedError> {
        config.validate()?;
        let (sync_events, _) = broadcast::channel(SYNC_CHANNEL_CAPACITY);
        Ok(Self {
            rate: config.initial_rate,
            buffer: ArrivalBuffer::new(),
            cadence: CadenceEstimator::new(config.initial_cadence_average(), &config.cadence),
            selector: FrameSelector::new(config.policy, &config.warp, &config.trim),
            fetcher: FetchScheduler::new(),
            sync_events,
            config,
        })
    }

    /// Picks the sample to display at `now`, if any.
    pub fn render_tick(&mut self, now: Instant) -> Option<Sample> {
        self.selector.tick(
            now,
            &mut self.buffer,
            &self.cadence,
            self.rate,
            &self.sync_events,
        )
    }

    /// Claims the request slot. `None` means a request is already outstanding.
    pub fn begin_fetch(&mut self) -> Option<FetchCursor> {
        self.fetcher.begin()
    }

    /// Applies the result of the request started by [`begin_fetch`](Self::begin_fetch).
    ///
    /// A response that fails [`FeedResponse::validate`] is a failed fetch and
    /// leaves the buffer untouched. A changed rate restarts playback before the
    /// batch is appended, so the new batch is sized and displayed under the
    /// new rate.
    pub fn complete_fetch(&mut self, result: Result<FeedResponse, FeedError>) -> FetchOutcome {
        let (response, rate) = match result.and_then(|r| r.validate().map(|rate| (r, rate))) {
            Ok(valid) => valid,
            Err(error) => {
                warn!(%error, cursor = %self.fetcher.cursor(), "Fetch failed; retrying on the next fetch tick.");
                self.fetcher.finish();
                return FetchOutcome::Failed(error);
            }
        };

        let restarted = if rate != self.rate {
            self.restart(rate);
            Some(rate)
        } else {
            None
        };

        let batch = response.samples;
        let appended = batch.len();
        let was_empty = self.buffer.is_empty();
        let refill = was_empty && appended > 0;
        self.cadence.update(&batch, was_empty, &self.sync_events);
        self.fetcher.advance(&batch);
        self.buffer.append(batch);
        self.fetcher.finish();

        debug!(
            appended,
            buffered = self.buffer.len(),
            span = self.buffer.span(),
            refill,
            "Batch appended."
        );
        FetchOutcome::Applied {
            appended,
            buffered: self.buffer.len(),
            refill,
            restarted,
        }
    }

    /// Restarts playback at a new rate.
    ///
    /// Playback and cadence state start over. Buffered samples and the fetch
    /// cursor are kept.
    pub fn restart(&mut self, rate: FeedRate) {
        info!(from = %self.rate, to = %rate, "Feed rate changed; restarting playback.");
        self.rate = rate;
        self.selector.reset();
        self.cadence =
            CadenceEstimator::new(self.config.initial_cadence_average(), &self.config.cadence);
    }

    pub fn rate(&self) -> FeedRate {
        self.rate
    }

    pub fn config(&self) -> &FeedClockConfig {
        &self.config
    }

    pub fn buffer(&self) -> &ArrivalBuffer {
        &self.buffer
    }

    pub fn cadence(&self) -> &CadenceEstimator {
        &self.cadence
    }

    pub fn is_fetch_in_flight(&self) -> bool {
        self.fetcher.is_in_flight()
    }

    /// A snapshot of the session for status displays.
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            rate: self.rate.samples_per_sec(),
            buffered_samples: self.buffer.len(),
            buffered_span: self.buffer.span(),
            target_depth: self.cadence.target_depth(),
            cadence_average: self.cadence.average(),
            warp: self.selector.warp(),
            playback_position: self.selector.position(),
            last_presented: self.selector.last_presented(),
            fetch_in_flight: self.fetcher.is_in_flight(),
            cursor: match self.fetcher.cursor() {
                FetchCursor::FromStart => None,
                FetchCursor::After(ts) => Some(ts),
            },
        }
    }

    /// Subscribes to resynchronization, starvation and cadence events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync_events.subscribe()
    }

    pub(crate) fn sync_sender(&self) -> broadcast::Sender<SyncEvent> {
        self.sync_events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectionPolicy;
    use crate::events::ResyncReason;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn run(from: f64, to: f64, step: f64) -> Vec<Sample> {
        let n = ((to - from) / step).round() as usize;
        (0..=n).map(|i| Sample::empty(from + i as f64 * step)).collect()
    }

    fn response(rate: f64, samples: Vec<Sample>) -> Result<FeedResponse, FeedError> {
        Ok(FeedResponse::new(rate, samples))
    }

    /// Fetch period 0.25s, so the initial cadence is 0.5s and the target depth 2.0s.
    fn session() -> PlaybackSession {
        let config = FeedClockConfig {
            fetch_period_secs: 0.25,
            initial_rate: FeedRate::new(10.0).unwrap(),
            ..FeedClockConfig::default()
        };
        PlaybackSession::new(config).unwrap()
    }

    #[test]
    fn rejects_invalid_configuration() {
        let config = FeedClockConfig {
            fetch_period_secs: 0.0,
            ..FeedClockConfig::default()
        };
        assert!(matches!(
            PlaybackSession::new(config),
            Err(FeedError::Config(_))
        ));
    }

    #[test]
    fn single_request_in_flight() {
        let mut session = session();
        assert_eq!(session.begin_fetch(), Some(FetchCursor::FromStart));
        assert_eq!(session.begin_fetch(), None);
        assert!(session.status().fetch_in_flight);

        session.complete_fetch(response(10.0, run(0.0, 1.0, 0.1)));
        assert!(!session.is_fetch_in_flight());
        assert_eq!(session.begin_fetch(), Some(FetchCursor::After(1.0)));
    }

    #[test]
    fn failure_frees_the_slot_and_keeps_the_cursor() {
        let mut session = session();
        session.begin_fetch();
        session.complete_fetch(response(10.0, run(0.0, 1.0, 0.1)));
        session.begin_fetch();
        let outcome = session.complete_fetch(Err(FeedError::Timeout(Duration::from_secs(2))));
        assert!(matches!(outcome, FetchOutcome::Failed(FeedError::Timeout(_))));
        assert_eq!(session.begin_fetch(), Some(FetchCursor::After(1.0)));
        assert_eq!(session.buffer().len(), 11);
    }

    #[test]
    fn unusable_rate_is_a_failure() {
        let mut session = session();
        session.begin_fetch();
        let outcome = session.complete_fetch(response(f64::NAN, run(0.0, 1.0, 0.1)));
        assert!(matches!(
            outcome,
            FetchOutcome::Failed(FeedError::MalformedResponse(_))
        ));
        assert!(session.buffer().is_empty());
        assert!(!session.is_fetch_in_flight());
    }

    #[test]
    fn rate_without_a_usable_tick_period_is_a_failure() {
        let mut session = session();
        session.begin_fetch();
        session.complete_fetch(response(10.0, run(0.0, 1.0, 0.1)));

        session.begin_fetch();
        let outcome = session.complete_fetch(response(1e-30, run(1.1, 2.0, 0.1)));
        assert!(matches!(
            outcome,
            FetchOutcome::Failed(FeedError::MalformedResponse(_))
        ));
        assert_eq!(session.rate().samples_per_sec(), 10.0);
        assert_eq!(session.buffer().len(), 11);
        assert_eq!(session.begin_fetch(), Some(FetchCursor::After(1.0)));
    }

    #[test]
    fn batch_with_a_bad_timestamp_is_rejected_whole() {
        let mut session = session();
        let start = Instant::now();
        let mut batch = run(0.0, 2.9, 0.1);
        batch.push(Sample::empty(f64::NAN));

        session.begin_fetch();
        let outcome = session.complete_fetch(response(10.0, batch));
        assert!(matches!(
            outcome,
            FetchOutcome::Failed(FeedError::MalformedResponse(_))
        ));
        assert!(session.buffer().is_empty());
        assert_eq!(session.begin_fetch(), Some(FetchCursor::FromStart));

        // The session is still usable: a clean batch plays normally.
        session.complete_fetch(response(10.0, run(0.0, 3.0, 0.1)));
        let frames: Vec<_> = (0..10)
            .filter_map(|i| session.render_tick(start + Duration::from_millis(100 * i)))
            .collect();
        assert!(!frames.is_empty());
        assert!(session.status().warp.is_finite());
    }

    #[test]
    fn first_batch_is_a_refill_and_leaves_the_cadence_alone() {
        let mut session = session();
        session.begin_fetch();
        let outcome = session.complete_fetch(response(10.0, run(0.0, 3.0, 0.1)));
        assert!(matches!(
            outcome,
            FetchOutcome::Applied {
                appended: 31,
                refill: true,
                restarted: None,
                ..
            }
        ));
        assert_eq!(session.cadence().average(), 0.5);

        session.begin_fetch();
        session.complete_fetch(response(10.0, run(3.25, 4.5, 0.25)));
        assert_relative_eq!(session.cadence().average(), 0.575, epsilon = 1e-9);
    }

    #[test]
    fn waits_for_target_depth_then_plays_in_order() {
        let mut session = session();
        let mut events = session.subscribe();
        let start = Instant::now();

        session.begin_fetch();
        session.complete_fetch(response(10.0, run(0.0, 1.6, 0.1)));
        assert_eq!(session.render_tick(start), None);

        session.begin_fetch();
        session.complete_fetch(response(10.0, run(1.7, 2.4, 0.1)));
        let first = session.render_tick(start + Duration::from_millis(100));
        assert!(first.is_some());
        assert!(matches!(
            events.try_recv(),
            Ok(SyncEvent::Resynchronized {
                reason: ResyncReason::Startup,
                ..
            })
        ));

        let mut last = first.map(|s| s.timestamp);
        for i in 2..20 {
            let frame = session.render_tick(start + Duration::from_millis(100 * i));
            if let Some(frame) = frame {
                assert!(Some(frame.timestamp) >= last);
                last = Some(frame.timestamp);
            }
        }
    }

    #[test]
    fn rate_change_restarts_playback_but_keeps_buffer_and_cursor() {
        let mut session = session();
        let start = Instant::now();
        session.begin_fetch();
        session.complete_fetch(response(10.0, run(0.0, 3.0, 0.1)));
        assert!(session.render_tick(start).is_some());
        assert!(session.status().playback_position.is_some());
        let buffered = session.buffer().len();

        session.begin_fetch();
        let outcome = session.complete_fetch(response(20.0, run(3.25, 4.5, 0.25)));
        let FetchOutcome::Applied { restarted, .. } = outcome else {
            panic!("expected the batch to be applied");
        };
        assert_eq!(restarted, Some(FeedRate::new(20.0).unwrap()));
        assert_eq!(session.rate().samples_per_sec(), 20.0);

        let status = session.status();
        assert_eq!(status.playback_position, None);
        assert_eq!(status.last_presented, None);
        // Fresh estimator, then one update with the 1.25s batch.
        assert_relative_eq!(status.cadence_average, 0.575, epsilon = 1e-9);
        assert_eq!(status.cursor, Some(4.5));
        assert_eq!(status.buffered_samples, buffered + 6);
    }

    #[test]
    fn trim_policy_is_selectable() {
        let config = FeedClockConfig {
            policy: SelectionPolicy::Trim,
            ..FeedClockConfig::default()
        };
        let mut session = PlaybackSession::new(config).unwrap();
        session.begin_fetch();
        session.complete_fetch(response(30.0, run(5.0, 5.5, 0.1)));
        assert_eq!(
            session.render_tick(Instant::now()).map(|s| s.timestamp),
            Some(5.0)
        );
        assert_eq!(session.status().warp, 1.0);
    }
}
