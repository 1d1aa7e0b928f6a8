//! Defines all public event types broadcast by a feedclock session and engine.
//!
//! Listeners subscribe to these strongly-typed streams to observe playback
//! without touching the session state itself.

use crate::common::{FeedRate, FetchCursor};
use tokio::time::Instant;

/// Events related to the lifecycle of the engine itself.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Fired once when the engine's scheduling loop begins.
    EngineStarted { timestamp: Instant },
    /// Fired when the feed reported a new rate and both timers were recreated.
    Restarted { rate: FeedRate },
    /// Fired once when the scheduling loop has exited.
    EngineShutdown,
}

/// Events related to network fetches.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// A request was issued with this lower bound.
    Requested { cursor: FetchCursor },
    /// A response was processed.
    Completed {
        appended: usize,
        buffered: usize,
        refill: bool,
    },
    /// A request failed or timed out. The next fetch tick retries.
    Failed { reason: String },
}

/// Why the playback position jumped instead of advancing smoothly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// Playback (re)started inside a freshly filled buffer.
    Startup,
    /// The next sample was further ahead than the maximum skip.
    MaxSkip,
    /// The oldest sample led playback by more than the lateness threshold.
    Lateness,
    /// The backlog exceeded the hard cap and was shed.
    HardCap,
}

/// Events describing the playback synchronization itself.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The playback position moved discontinuously.
    Resynchronized {
        from: Option<f64>,
        to: f64,
        reason: ResyncReason,
    },
    /// The buffer ran dry; no frames until it refills.
    Starved { position: Option<f64> },
    /// Every recent batch arrived into an empty buffer, so the cadence
    /// estimate has not been updated for a while.
    CadenceStalled {
        skipped_refills: u32,
        average: f64,
    },
}

/// A point-in-time view of a session, published after every render tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    pub rate: f64,
    pub buffered_samples: usize,
    pub buffered_span: f64,
    pub target_depth: f64,
    pub cadence_average: f64,
    pub warp: f64,
    pub playback_position: Option<f64>,
    pub last_presented: Option<f64>,
    pub fetch_in_flight: bool,
    pub cursor: Option<f64>,
}
