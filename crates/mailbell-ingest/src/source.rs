//! Alert source: the server's stream and poll endpoints.
//!
//! The stream endpoint is a Server-Sent-Events style text stream. Only
//! `data: <json>` lines carry alerts; every other line (comments, `event:`,
//! blank separators) is ignored. The poll endpoint answers
//! `{"alerts": [...]}`.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use mailbell_core::{AlertEvent, IngestConfig};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Lines of an open event stream.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Where alerts come from.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Open the long-lived event stream.
    async fn open_stream(&self) -> Result<LineStream>;

    /// Fetch alerts newer than `since` (seconds since the epoch).
    ///
    /// Malformed entries are dropped; an empty or missing list means no
    /// new alerts.
    async fn poll(&self, since: f64) -> Result<Vec<AlertEvent>>;
}

/// Payload of a `data:` line, if `line` is one.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:")
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
}

/// Split a byte stream into lines, stripping `\r\n` / `\n` terminators.
///
/// A trailing line without terminator is yielded when the stream ends.
pub fn lines<S, B, E>(bytes: S) -> LineStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<IngestError> + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        futures_util::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(Into::<IngestError>::into)?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = buffer.drain(..=newline).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                yield String::from_utf8_lossy(&line).into_owned();
            }
        }

        if !buffer.is_empty() {
            yield String::from_utf8_lossy(&buffer).into_owned();
        }
    })
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    alerts: Option<Vec<serde_json::Value>>,
}

/// Parse a poll response body, dropping entries that are not alerts.
pub fn parse_poll_response(body: &str) -> Result<Vec<AlertEvent>> {
    let response: PollResponse = serde_json::from_str(body)
        .map_err(|e| IngestError::MalformedPayload(format!("poll response: {e}")))?;

    Ok(response
        .alerts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| match AlertEvent::from_value(value) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, "dropping malformed alert in poll response");
                None
            }
        })
        .collect())
}

/// HTTP implementation of [`AlertSource`].
pub struct HttpAlertSource {
    client: reqwest::Client,
    base_url: String,
    stream_path: String,
    poll_path: String,
    request_timeout: Duration,
}

impl HttpAlertSource {
    pub fn new(base_url: &str, config: &IngestConfig) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(IngestError::ConfigError(format!(
                "server URL must start with http:// or https://, got {base_url}"
            )));
        }

        // No overall timeout: the event stream stays open indefinitely.
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| IngestError::ConfigError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            stream_path: config.stream_path.clone(),
            poll_path: config.poll_path.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn timeout_secs(&self) -> u64 {
        self.request_timeout.as_secs()
    }
}

#[async_trait]
impl AlertSource for HttpAlertSource {
    async fn open_stream(&self) -> Result<LineStream> {
        let url = self.endpoint(&self.stream_path);
        debug!(url = %url, "opening event stream");

        let request = self
            .client
            .get(&url)
            .header("accept", "text/event-stream")
            .send();
        let response = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| IngestError::Timeout(self.timeout_secs(), format!("connecting to {url}")))?
            .map_err(|e| IngestError::from_reqwest(e, self.timeout_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::from_http_status(status.as_u16(), &body));
        }

        Ok(lines(response.bytes_stream()))
    }

    async fn poll(&self, since: f64) -> Result<Vec<AlertEvent>> {
        let url = self.endpoint(&self.poll_path);
        let response = self
            .client
            .get(&url)
            .query(&[("since", since)])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| IngestError::from_reqwest(e, self.timeout_secs()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IngestError::from_reqwest(e, self.timeout_secs()))?;
        if !status.is_success() {
            return Err(IngestError::from_http_status(status.as_u16(), &body));
        }

        parse_poll_response(&body)
    }
}
