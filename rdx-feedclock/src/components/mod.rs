//! Building blocks of a playback session.

pub mod buffer;
pub mod cadence;
pub mod fetcher;
pub mod selector;
