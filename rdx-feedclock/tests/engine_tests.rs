use async_trait::async_trait;
use feedclock::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Answers every request after `delay` with five samples past the cursor,
/// and records how many requests were outstanding at once.
#[derive(Clone, Default)]
struct SlowTransport {
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl SlowTransport {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Transport for SlowTransport {
    async fn fetch(&self, cursor: FetchCursor) -> Result<FeedResponse, FeedError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        let from = match cursor {
            FetchCursor::FromStart => 0.0,
            FetchCursor::After(ts) => ts + 0.1,
        };
        let samples = (0..5).map(|i| Sample::empty(from + i as f64 * 0.1)).collect();
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(FeedResponse::new(10.0, samples))
    }
}

fn config() -> FeedClockConfig {
    FeedClockConfig {
        fetch_period_secs: 0.25,
        initial_rate: FeedRate::new(10.0).unwrap(),
        ..FeedClockConfig::default()
    }
}

fn quiet_feed(rate: f64) -> SimulatedFeed {
    SimulatedFeed::new(SimulatedFeedSettings {
        rate: FeedRate::new(rate).unwrap(),
        latency: Duration::from_millis(30),
        jitter: Duration::from_millis(20),
        seed: Some(42),
        ..SimulatedFeedSettings::default()
    })
}

/// Starts the engine with a renderer that records presented timestamps.
fn start(engine: &FeedClockEngine) -> (JoinHandle<anyhow::Result<()>>, Arc<Mutex<Vec<f64>>>) {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    let renderer = move |frame: Option<&Sample>| {
        if let Some(sample) = frame {
            sink.lock().unwrap().push(sample.timestamp);
        }
    };
    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.run_until_stopped(renderer).await });
    (handle, frames)
}

#[test]
fn invalid_configuration_is_rejected() {
    let config = FeedClockConfig {
        request_timeout_secs: -1.0,
        ..FeedClockConfig::default()
    };
    assert!(FeedClockEngine::new(config, SlowTransport::default()).is_err());
}

#[tokio::test(start_paused = true)]
async fn never_more_than_one_request_outstanding() {
    let transport = SlowTransport::new(Duration::from_millis(1200));
    let engine = FeedClockEngine::new(config(), transport.clone()).unwrap();
    let (handle, _) = start(&engine);

    tokio::time::sleep(Duration::from_secs(6)).await;
    engine.stop();
    handle.await.unwrap().unwrap();

    assert_eq!(transport.max_active.load(Ordering::SeqCst), 1);
    let calls = transport.calls.load(Ordering::SeqCst);
    assert!((2..=6).contains(&calls), "{calls} requests in 6s");
}

#[tokio::test(start_paused = true)]
async fn presented_timestamps_never_go_backwards() {
    let engine = FeedClockEngine::new(config(), quiet_feed(10.0)).unwrap();
    let (handle, frames) = start(&engine);

    tokio::time::sleep(Duration::from_secs(20)).await;
    engine.stop();
    handle.await.unwrap().unwrap();

    let frames = frames.lock().unwrap();
    assert!(frames.len() > 50, "only {} frames presented", frames.len());
    assert!(frames.windows(2).all(|pair| pair[0] <= pair[1]));

    let status = engine.status().borrow().clone();
    assert!((0.8..=1.2).contains(&status.warp));
    assert!(status.playback_position.is_some());
}

#[tokio::test(start_paused = true)]
async fn rate_change_restarts_the_timers() {
    let feed = quiet_feed(10.0);
    let control = feed.control();
    let engine = FeedClockEngine::new(config(), feed).unwrap();
    let mut system_events = engine.subscribe_system_events();
    let (handle, frames) = start(&engine);

    tokio::time::sleep(Duration::from_secs(3)).await;
    control.set_rate(FeedRate::new(20.0).unwrap()).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    engine.stop();
    handle.await.unwrap().unwrap();

    let mut restarted = None;
    while let Ok(event) = system_events.try_recv() {
        if let SystemEvent::Restarted { rate } = event {
            restarted = Some(rate);
        }
    }
    assert_eq!(restarted, Some(FeedRate::new(20.0).unwrap()));
    assert_eq!(engine.session().lock().await.rate().samples_per_sec(), 20.0);

    let frames = frames.lock().unwrap();
    assert!(frames.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test(start_paused = true)]
async fn hung_requests_time_out() {
    let transport = SlowTransport::new(Duration::from_secs(5));
    let engine = FeedClockEngine::new(config(), transport).unwrap();
    let mut fetch_events = engine.subscribe_fetch_events();
    let (handle, frames) = start(&engine);

    tokio::time::sleep(Duration::from_secs(3)).await;
    engine.stop();
    handle.await.unwrap().unwrap();

    let mut failures = Vec::new();
    while let Ok(event) = fetch_events.try_recv() {
        if let FetchEvent::Failed { reason } = event {
            failures.push(reason);
        }
    }
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("timed out"));
    assert!(frames.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stopped_engine_does_no_work() {
    let transport = SlowTransport::new(Duration::ZERO);
    let engine = FeedClockEngine::new(config(), transport.clone()).unwrap();
    let mut system_events = engine.subscribe_system_events();
    engine.stop();
    assert!(engine.is_stopped());

    let (handle, frames) = start(&engine);
    handle.await.unwrap().unwrap();

    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    assert!(frames.lock().unwrap().is_empty());
    assert!(matches!(
        system_events.try_recv(),
        Ok(SystemEvent::EngineStarted { .. })
    ));
    assert!(matches!(
        system_events.try_recv(),
        Ok(SystemEvent::EngineShutdown)
    ));
}
