//! Streaming HTTP completion provider.
//!
//! Talks to a completion endpoint that streams line-delimited JSON chunks,
//! each carrying a `text` field. Transport failures before the stream opens
//! are retried with exponential backoff plus jitter; an open stream is never
//! restarted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::CompletionSettings;

use super::{ChunkStream, Completion};

/// Connect/read timeout for opening the stream.
const REQUEST_TIMEOUT_SECS: u64 = 600;

/// Retry schedule: 3 retries, exponential backoff from 1s, up to 25% jitter.
const RETRY_BASE_DELAY_SECS: u64 = 1;
const MAX_RETRIES: usize = 3;
const RETRY_JITTER_DIVISOR: u128 = 4;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    text: Option<String>,
}

/// Completion provider backed by a streaming HTTP endpoint.
pub struct HttpCompletion {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    session_id: String,
}

impl HttpCompletion {
    pub fn new(settings: CompletionSettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: settings.base_url,
            api_token: settings.api_token,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    fn completions_url(&self) -> Result<Url> {
        let base = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid completion base URL: {}", self.base_url))?;
        base.join("completions")
            .context("Failed to build completions URL")
    }
}

#[async_trait]
impl Completion for HttpCompletion {
    async fn stream(
        &self,
        prompt: &str,
        model_id: &str,
        max_tokens: usize,
    ) -> Result<ChunkStream> {
        let url = self.completions_url()?;
        let request_id = Uuid::new_v4().to_string();
        let body = CompletionRequest {
            prompt,
            model: model_id,
            max_tokens,
            stream: true,
        };

        debug!("=== Completion Request ===");
        debug!("URL: {}", url);
        debug!("Model: {}", model_id);
        debug!("Prompt length: {} chars", prompt.len());

        let response = send_with_retry(|| {
            let mut request = self
                .client
                .post(url.clone())
                .header("Content-Type", "application/json")
                .header("x-request-id", &request_id)
                .header("x-request-session-id", &self.session_id);
            if let Some(token) = &self.api_token {
                request = request.header("Authorization", format!("Bearer {}", token));
            }
            request.json(&body)
        })
        .await
        .with_context(|| format!("Failed to open completion stream at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!(
                "Completion request failed with status {}: {}",
                status,
                error_text
            );
        }

        Ok(decode_chunks(Box::pin(response.bytes_stream())))
    }
}

/// Decode a byte stream of line-delimited JSON into text chunks.
///
/// Lines are only parsed once their trailing newline arrives, so byte chunks
/// may split a JSON object anywhere. A trailing unterminated line is flushed
/// when the transport ends.
fn decode_chunks(
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
) -> ChunkStream {
    struct State {
        inner: BoxStream<'static, reqwest::Result<Bytes>>,
        buffer: String,
        ended: bool,
    }

    let state = State {
        inner,
        buffer: String::new(),
        ended: false,
    };

    Box::pin(futures_util::stream::try_unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buffer.find('\n') {
                let line = st.buffer[..pos].trim().to_string();
                st.buffer.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                if let Some(text) = parse_chunk_line(&line) {
                    return Ok(Some((text, st)));
                }
                continue;
            }

            if st.ended {
                let rest = st.buffer.trim().to_string();
                st.buffer.clear();
                if !rest.is_empty() {
                    if let Some(text) = parse_chunk_line(&rest) {
                        return Ok(Some((text, st)));
                    }
                }
                return Ok(None);
            }

            match st.inner.next().await {
                Some(Ok(bytes)) => st.buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Some(Err(e)) => {
                    return Err(anyhow::Error::new(e).context("Failed to read completion chunk"))
                }
                None => st.ended = true,
            }
        }
    }))
}

fn parse_chunk_line(line: &str) -> Option<String> {
    match serde_json::from_str::<CompletionChunk>(line) {
        Ok(chunk) => chunk.text,
        Err(_) => None,
    }
}

fn is_retriable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retriable_send_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn retry_base_delay(attempt: usize) -> Duration {
    let multiplier = 1u64.checked_shl(attempt as u32).unwrap_or(u64::MAX);
    Duration::from_secs(RETRY_BASE_DELAY_SECS.saturating_mul(multiplier))
}

fn add_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = delay.as_millis() / RETRY_JITTER_DIVISOR;
    if max_jitter_ms == 0 {
        return delay;
    }
    let max_jitter_ms = std::cmp::min(max_jitter_ms, u128::from(u64::MAX)) as u64;
    let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
    delay + Duration::from_millis(jitter_ms)
}

async fn send_with_retry(
    mut make_request: impl FnMut() -> reqwest::RequestBuilder,
) -> Result<reqwest::Response> {
    let max_attempts = MAX_RETRIES + 1;

    for attempt in 0..max_attempts {
        match make_request().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let should_retry = is_retriable_status(status) && attempt < MAX_RETRIES;
                if should_retry {
                    let delay = add_jitter(retry_base_delay(attempt));
                    debug!(
                        "Completion request failed with status {}; retrying in {:?} (attempt {}/{})",
                        status,
                        delay,
                        attempt + 1,
                        max_attempts
                    );
                    let _ = response.bytes().await;
                    sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let should_retry = is_retriable_send_error(&err) && attempt < MAX_RETRIES;
                if should_retry {
                    let delay = add_jitter(retry_base_delay(attempt));
                    debug!(
                        "Completion request error: {}; retrying in {:?} (attempt {}/{})",
                        err,
                        delay,
                        attempt + 1,
                        max_attempts
                    );
                    sleep(delay).await;
                    continue;
                }
                return Err(anyhow::Error::new(err)).with_context(|| {
                    format!("Completion request failed after {} attempt(s)", attempt + 1)
                });
            }
        }
    }

    unreachable!("send_with_retry should have returned within max_attempts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[test]
    fn test_completions_url() {
        let provider = HttpCompletion::new(CompletionSettings::new(
            "https://api.example.com/v1/",
            Some("token".to_string()),
        ));
        let url = provider.completions_url().unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/completions");

        let provider = HttpCompletion::new(CompletionSettings::new("not a url", None));
        assert!(provider.completions_url().is_err());
    }

    fn byte_stream(chunks: Vec<&str>) -> BoxStream<'static, reqwest::Result<Bytes>> {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
                .collect::<Vec<_>>(),
        ))
    }

    #[tokio::test]
    async fn test_decode_complete_lines() {
        let stream = decode_chunks(byte_stream(vec![
            "{\"text\": \"hello \"}\n{\"text\": \"world\"}\n",
        ]));
        let text = super::super::collect_stream(stream).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_decode_split_mid_object() {
        // The JSON object is split across byte chunks.
        let stream = decode_chunks(byte_stream(vec!["{\"te", "xt\": \"ab\"}\n{\"text\"", ": \"cd\"}\n"]));
        let text = super::super::collect_stream(stream).await.unwrap();
        assert_eq!(text, "abcd");
    }

    #[tokio::test]
    async fn test_decode_flushes_unterminated_tail() {
        let stream = decode_chunks(byte_stream(vec!["{\"text\": \"tail\"}"]));
        let text = super::super::collect_stream(stream).await.unwrap();
        assert_eq!(text, "tail");
    }

    #[tokio::test]
    async fn test_decode_skips_malformed_lines() {
        let stream = decode_chunks(byte_stream(vec!["garbage\n{\"text\": \"ok\"}\n"]));
        let text = super::super::collect_stream(stream).await.unwrap();
        assert_eq!(text, "ok");
    }
}
