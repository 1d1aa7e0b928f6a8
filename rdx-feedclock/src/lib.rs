//! # Feedclock
//!
//! Adaptive playback synchronization for a polled positional feed.
//!
//! A tracking server publishes timestamped samples of a table (a ball and
//! four rods per team). Clients poll it, and the samples arrive in irregular,
//! bursty, sometimes late batches. Feedclock turns that into a steady stream
//! of one sample per render tick.
//!
//! ## Core Concepts
//!
//! - **Arrival Buffer**: every fetched batch is appended here, in order.
//! - **Cadence**: a moving average of how much sample-time one fetch
//!   delivers. The target buffer depth is a multiple of it.
//! - **Frame Selector**: on every render tick, picks the sample to show. The
//!   default policy runs a virtual playback clock that is warped (sped up or
//!   slowed down within a bound) to keep the buffer near its target depth.
//! - **Engine**: drives a `PlaybackSession` with a render timer and a fetch
//!   timer, broadcasting strongly-typed events along the way.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use feedclock::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. Load the configuration (defaults, an optional file, FEEDCLOCK__* env).
//!     let config = FeedClockConfig::load(None)?;
//!
//!     // 2. Pick a transport. The simulated feed stands in for the tracking server.
//!     let feed = SimulatedFeed::new(SimulatedFeedSettings::default());
//!
//!     // 3. Create the engine.
//!     let engine = FeedClockEngine::new(config, feed)?;
//!
//!     // 4. Subscribe to an event stream before starting the engine.
//!     let mut sync_events = engine.subscribe_sync_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = sync_events.recv().await {
//!             println!("Received Sync Event: {:?}", event);
//!         }
//!     });
//!
//!     // 5. Run the engine. It will shut down on Ctrl+C.
//!     engine.run(TracingRenderer::new()).await?;
//!
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Feedclock";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod common;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod labs;
pub mod renderer;
pub mod sample;
pub mod session;
pub mod time;
pub mod transport;

/// A prelude module for easy importing of the most common Feedclock types.
pub mod prelude {
    pub use crate::common::{FeedRate, FetchCursor};
    pub use crate::config::{FeedClockConfig, SelectionPolicy};
    pub use crate::engine::FeedClockEngine;
    pub use crate::error::{ConfigError, FeedError};
    pub use crate::events::{FetchEvent, ResyncReason, SyncEvent, SyncStatus, SystemEvent};
    pub use crate::labs::simulated_feed::{FeedControl, SimulatedFeed, SimulatedFeedSettings};
    pub use crate::renderer::{Renderer, TracingRenderer};
    pub use crate::sample::{BallPosition, RodState, Sample, TablePayload};
    pub use crate::session::{FetchOutcome, PlaybackSession};
    pub use crate::transport::{FeedResponse, Transport};
}
