//! The contract between a playback session and whatever delivers samples.
//!
//! The session never talks to the network itself. A [`Transport`] is asked
//! for "everything after this cursor" on each fetch tick and answers with a
//! [`FeedResponse`]. JSON over HTTP polling is one realization; the wire
//! codec for it lives here so that any transport can share it.

use crate::common::{FeedRate, FetchCursor};
use crate::error::FeedError;
use crate::sample::Sample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Something that can be polled for new samples.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Requests every sample newer than `cursor`.
    async fn fetch(&self, cursor: FetchCursor) -> Result<FeedResponse, FeedError>;
}

/// One polling response: the feed's sample rate and an ordered batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedResponse {
    /// Samples per second the producer is running at.
    #[serde(rename = "fps")]
    pub rate: f64,

    /// New samples, oldest first.
    #[serde(rename = "data")]
    pub samples: Vec<Sample>,

    /// How many samples the server keeps in its rolling buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_len: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl FeedResponse {
    pub fn new(rate: f64, samples: Vec<Sample>) -> Self {
        Self {
            rate,
            samples,
            buffer_len: None,
            version: Some(1),
        }
    }

    /// Decodes and validates a JSON response body.
    pub fn from_json(body: &[u8]) -> Result<Self, FeedError> {
        let response: FeedResponse = serde_json::from_slice(body)?;
        response.validate()?;
        Ok(response)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, FeedError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Checks that the response can be appended as-is and returns its rate.
    ///
    /// Every timestamp must be finite and the batch must be in ascending
    /// order. Repeated timestamps are allowed.
    pub fn validate(&self) -> Result<FeedRate, FeedError> {
        let rate =
            FeedRate::new(self.rate).map_err(|e| FeedError::MalformedResponse(e.to_string()))?;
        if let Some(bad) = self.samples.iter().find(|s| !s.timestamp.is_finite()) {
            return Err(FeedError::MalformedResponse(format!(
                "non-finite sample timestamp {}",
                bad.timestamp
            )));
        }
        if let Some(pair) = self
            .samples
            .windows(2)
            .find(|pair| pair[1].timestamp < pair[0].timestamp)
        {
            return Err(FeedError::MalformedResponse(format!(
                "sample timestamps go backwards ({} after {})",
                pair[1].timestamp, pair[0].timestamp
            )));
        }
        Ok(rate)
    }
}
