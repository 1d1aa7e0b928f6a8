//! Bookkeeping for the polling side: one request at a time, and a cursor
//! that only ever moves forward.

use crate::common::FetchCursor;
use crate::sample::Sample;
use tracing::trace;

/// Guards against overlapping requests and tracks what to ask for next.
#[derive(Debug, Clone)]
pub struct FetchScheduler {
    in_flight: bool,
    cursor: FetchCursor,
}

impl Default for FetchScheduler {
    fn default() -> Self {
        Self {
            in_flight: false,
            cursor: FetchCursor::FromStart,
        }
    }
}

impl FetchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the single request slot.
    ///
    /// Returns the cursor to request with, or `None` if a request is
    /// already outstanding.
    pub fn begin(&mut self) -> Option<FetchCursor> {
        if self.in_flight {
            trace!(cursor = %self.cursor, "Fetch tick skipped: a request is still outstanding.");
            return None;
        }
        self.in_flight = true;
        Some(self.cursor)
    }

    /// Moves the cursor to the end of an appended batch. Never moves it back.
    pub fn advance(&mut self, batch: &[Sample]) {
        let Some(last) = batch.last() else {
            return;
        };
        match self.cursor {
            FetchCursor::After(current) if last.timestamp <= current => {}
            _ => self.cursor = FetchCursor::After(last.timestamp),
        }
    }

    /// Releases the request slot, whatever the outcome was.
    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn cursor(&self) -> FetchCursor {
        self.cursor
    }
}
