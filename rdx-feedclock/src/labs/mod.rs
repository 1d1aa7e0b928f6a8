//! Experimental and simulation components.

pub mod simulated_feed;
