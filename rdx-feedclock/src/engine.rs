//! The engine that drives a playback session in real time.

use crate::common::FeedRate;
use crate::config::FeedClockConfig;
use crate::error::FeedError;
use crate::events::{FetchEvent, SyncEvent, SyncStatus, SystemEvent};
use crate::renderer::Renderer;
use crate::session::{FetchOutcome, PlaybackSession};
use crate::transport::{FeedResponse, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

type FetchResult = Result<FeedResponse, FeedError>;

/// The main feedclock engine.
///
/// It owns one [`PlaybackSession`] and runs two periodic timers against it:
/// the render timer (one tick per sample at the feed's rate) and the fetch
/// timer. Fetches run in their own task and report back over a channel, so
/// every mutation of the session happens inside the single scheduling loop.
/// The `Engine` is designed to be cloned and shared across tasks, providing a
/// handle to the running instance.
#[derive(Clone)]
pub struct FeedClockEngine {
    config: Arc<FeedClockConfig>,
    session: Arc<Mutex<PlaybackSession>>,
    transport: Arc<dyn Transport>,
    system_event_sender: broadcast::Sender<SystemEvent>,
    fetch_event_sender: broadcast::Sender<FetchEvent>,
    sync_event_sender: broadcast::Sender<SyncEvent>,
    status_sender: Arc<watch::Sender<SyncStatus>>,
    shutdown_sender: broadcast::Sender<()>,
    stopped: Arc<AtomicBool>,
}

// Core implementation block for internal logic.
impl FeedClockEngine {
    /// Creates an engine for a new session. Fails if `config` is invalid.
    pub fn new(config: FeedClockConfig, transport: impl Transport + 'static) -> Result<Self, FeedError> {
        let session = PlaybackSession::new(config.clone())?;
        let sync_event_sender = session.sync_sender();
        let (status_sender, _) = watch::channel(session.status());
        let (system_event_sender, _) = broadcast::channel(64);
        let (fetch_event_sender, _) = broadcast::channel(256);
        let (shutdown_sender, _) = broadcast::channel(1);

        Ok(Self {
            config: Arc::new(config),
            session: Arc::new(Mutex::new(session)),
            transport: Arc::new(transport),
            system_event_sender,
            fetch_event_sender,
            sync_event_sender,
            status_sender: Arc::new(status_sender),
            shutdown_sender,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs the scheduling loop until [`stop`](Self::stop) is called.
    ///
    /// Whenever a response reports a new rate, both timers are torn down and
    /// recreated so the render period follows the feed.
    pub async fn run_until_stopped(&self, mut renderer: impl Renderer) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_sender.subscribe();
        let (done_tx, mut done_rx) = mpsc::channel::<FetchResult>(1);

        self.system_event_sender
            .send(SystemEvent::EngineStarted {
                timestamp: Instant::now(),
            })
            .ok();

        'session: loop {
            let rate = self.session.lock().await.rate();
            let mut render_timer = time::interval(rate.tick_period());
            render_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut fetch_timer = time::interval(self.config.fetch_period());
            fetch_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(%rate, fetch_period = ?self.config.fetch_period(), "Playback timers running.");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break 'session,
                    Some(result) = done_rx.recv() => {
                        if let Some(rate) = self.apply_fetch(result).await {
                            self.system_event_sender
                                .send(SystemEvent::Restarted { rate })
                                .ok();
                            continue 'session;
                        }
                    }
                    _ = render_timer.tick() => {
                        if self.is_stopped() {
                            break 'session;
                        }
                        self.render_tick(&mut renderer).await;
                    }
                    _ = fetch_timer.tick() => {
                        if self.is_stopped() {
                            break 'session;
                        }
                        self.start_fetch(&done_tx).await;
                    }
                }
            }
        }

        self.system_event_sender
            .send(SystemEvent::EngineShutdown)
            .ok();
        info!("FeedClockEngine has shut down.");
        Ok(())
    }

    #[doc(hidden)]
    async fn render_tick(&self, renderer: &mut impl Renderer) {
        let mut session = self.session.lock().await;
        let frame = session.render_tick(Instant::now());
        trace!(timestamp = frame.as_ref().map(|s| s.timestamp), "Render tick.");
        renderer.present(frame.as_ref());
        self.status_sender.send_replace(session.status());
    }

    #[doc(hidden)]
    async fn start_fetch(&self, done_tx: &mpsc::Sender<FetchResult>) {
        let Some(cursor) = self.session.lock().await.begin_fetch() else {
            return;
        };
        debug!(%cursor, "Fetching.");
        self.fetch_event_sender
            .send(FetchEvent::Requested { cursor })
            .ok();

        let transport = self.transport.clone();
        let timeout = self.config.request_timeout();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = match time::timeout(timeout, transport.fetch(cursor)).await {
                Ok(result) => result,
                Err(_) => Err(FeedError::Timeout(timeout)),
            };
            // The loop may already be gone; the result is then irrelevant.
            done_tx.send(result).await.ok();
        });
    }

    /// Applies a fetch result. Returns the new rate if playback restarted.
    #[doc(hidden)]
    async fn apply_fetch(&self, result: FetchResult) -> Option<FeedRate> {
        let mut session = self.session.lock().await;
        let restarted = match session.complete_fetch(result) {
            FetchOutcome::Applied {
                appended,
                buffered,
                refill,
                restarted,
            } => {
                self.fetch_event_sender
                    .send(FetchEvent::Completed {
                        appended,
                        buffered,
                        refill,
                    })
                    .ok();
                restarted
            }
            FetchOutcome::Failed(error) => {
                self.fetch_event_sender
                    .send(FetchEvent::Failed {
                        reason: error.to_string(),
                    })
                    .ok();
                None
            }
        };
        self.status_sender.send_replace(session.status());
        restarted
    }
}

// Public API implementation block.
impl FeedClockEngine {
    /// Runs the engine until a Ctrl+C signal is received.
    pub async fn run(&self, renderer: impl Renderer + 'static) -> anyhow::Result<()> {
        info!("FeedClockEngine starting up...");
        let engine = self.clone();
        let mut handle = tokio::spawn(async move { engine.run_until_stopped(renderer).await });

        info!("Engine running. Press Ctrl+C to shut down.");
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received.");
                self.stop();
                handle.await??;
            }
            finished = &mut handle => finished??,
        }
        Ok(())
    }

    /// Stops the scheduling loop. Idempotent.
    ///
    /// Both periodic branches check the flag before doing any work, so no
    /// render or fetch tick runs after this returns.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Stopping playback.");
        }
        self.shutdown_sender.send(()).ok();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_event_sender.subscribe()
    }

    /// Subscribes to the `FetchEvent` stream.
    pub fn subscribe_fetch_events(&self) -> broadcast::Receiver<FetchEvent> {
        self.fetch_event_sender.subscribe()
    }

    /// Subscribes to the `SyncEvent` stream.
    pub fn subscribe_sync_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync_event_sender.subscribe()
    }

    /// A receiver that always holds the status after the latest tick.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_sender.subscribe()
    }

    /// The shared session, for inspection. Holding the lock pauses playback.
    pub fn session(&self) -> Arc<Mutex<PlaybackSession>> {
        self.session.clone()
    }

    pub fn config(&self) -> &FeedClockConfig {
        &self.config
    }
}
