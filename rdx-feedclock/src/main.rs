use anyhow::Result;
use feedclock::prelude::*;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging. RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // 2. Load the configuration from an optional path argument.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = FeedClockConfig::load(config_path.as_deref())?;
    info!(
        "{} v{} ({:?} policy, fetch every {:?})",
        feedclock::ENGINE_NAME,
        feedclock::VERSION,
        config.policy,
        config.fetch_period()
    );

    // 3. A simulated server with a little misbehavior thrown in.
    let feed = SimulatedFeed::new(SimulatedFeedSettings {
        rate: config.initial_rate,
        failure_rate: 0.02,
        ..SimulatedFeedSettings::default()
    });
    let control = feed.control();

    // 4. Create the FeedClockEngine instance.
    let engine = FeedClockEngine::new(config, feed)?;

    // 5. Spawn concurrent tasks to listen to different event streams.
    spawn_event_listeners(&engine);
    spawn_status_reporter(&engine);

    // 6. Stall the feed once, to show a refill burst.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        control.stall(Duration::from_secs(3)).await;
    });

    // 7. Run the engine.
    engine.run(TracingRenderer::new()).await?;

    Ok(())
}

/// Spawns several tasks, each subscribing to a different event stream from the engine.
fn spawn_event_listeners(engine: &FeedClockEngine) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            info!("[SYSTEM] => {:?}", event);
        }
    });

    let mut fetch_rx = engine.subscribe_fetch_events();
    tokio::spawn(async move {
        while let Ok(event) = fetch_rx.recv().await {
            match event {
                FetchEvent::Failed { reason } => warn!("[FETCH] => failed: {}", reason),
                FetchEvent::Completed { refill: true, appended, .. } => {
                    info!("[FETCH] => refill of {} samples", appended)
                }
                _ => {}
            }
        }
    });

    let mut sync_rx = engine.subscribe_sync_events();
    tokio::spawn(async move {
        while let Ok(event) = sync_rx.recv().await {
            info!("[SYNC] => {:?}", event);
        }
    });
}

/// Logs a status line every few seconds.
fn spawn_status_reporter(engine: &FeedClockEngine) {
    let status_rx = engine.status();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let status = status_rx.borrow().clone();
            info!(
                "[STATUS] => {} samples / {:.2}s buffered (target {:.2}s), warp {:.3}, at {:?}",
                status.buffered_samples,
                status.buffered_span,
                status.target_depth,
                status.warp,
                status.playback_position
            );
        }
    });
}
