//! Classification of upstream replies.

use std::time::Duration;

use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::Serialize;

use crate::error::EngineResult;

/// What a single outbound attempt told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Quota signal from the server, with its retry hint if it sent one.
    TooManyRequests { retry_after: Option<Duration> },
    Failure,
}

/// Implemented by anything an outbound call can return.
pub trait UpstreamOutcome {
    fn outcome(&self) -> Outcome;
}

/// Buffered HTTP reply: status, retry hint and parsed JSON body.
#[derive(Debug, Clone, Serialize)]
pub struct HttpReply {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: serde_json::Value,
}

impl HttpReply {
    pub async fn from_response(response: reqwest::Response) -> EngineResult<Self> {
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let text = response.text().await?;
        // Error pages are frequently not JSON; keep them as a string
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

        Ok(Self {
            status,
            retry_after,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }
}

impl UpstreamOutcome for HttpReply {
    fn outcome(&self) -> Outcome {
        match StatusCode::from_u16(self.status) {
            Ok(StatusCode::OK) => Outcome::Success,
            Ok(StatusCode::TOO_MANY_REQUESTS) => Outcome::TooManyRequests {
                retry_after: self.retry_after,
            },
            _ => Outcome::Failure,
        }
    }
}

/// `Retry-After` as a whole number of seconds.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    header_value?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
