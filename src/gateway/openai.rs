//! OpenAI Responses API adapter: streamed generation and input token counting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::{ErrorContext, ProviderError};
use super::types::*;
use super::TextGenerator;

// =============================================================================
// OPENAI ADAPTER
// =============================================================================

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Longest silence tolerated on an open connection. Streams may run longer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum allowed input characters (~500k tokens).
const MAX_INPUT_CHARS: usize = 2_000_000;

/// Maximum allowed size of a non-streamed response body (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Retry behaviour for opening a call.
///
/// Only the request that opens a stream is retried; once increments have
/// been handed out, a failure ends the stream.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base * multiplier
}

/// Timeouts surface as `Timeout`, everything else as `Http`.
fn transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout, None)
    } else {
        ProviderError::Http(err)
    }
}

/// OpenAI API adapter for the Responses endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
    default_api_key: Option<String>,
    timeout: Duration,
    retry: RetryConfig,
}

impl OpenAiAdapter {
    /// Create with the public endpoint and an optional default key.
    pub fn new(api_key: Option<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    /// Create with custom configuration.
    ///
    /// `timeout` bounds each wait on the connection, not the length of a
    /// stream: a generation that keeps producing text is never cut off.
    pub fn with_config(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let default_api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .read_timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_api_key,
            timeout,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url)
    }

    fn input_tokens_url(&self) -> String {
        format!("{}/responses/input_tokens", self.base_url)
    }

    /// Request key first, then the configured default.
    fn resolve_api_key(&self, override_key: Option<&str>) -> Result<String, ProviderError> {
        override_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_api_key.clone())
            .ok_or_else(|| {
                ProviderError::config(
                    "Missing OpenAI API key. Set OPENAI_API_KEY or provide api_key in request.",
                )
            })
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn validate_input(req: &TextRequest) -> Result<(), ProviderError> {
        let total_chars: usize = req.instructions.len()
            + req.sections.iter().map(|s| s.value.len()).sum::<usize>();

        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }
        Ok(())
    }

    /// POST a payload, retrying retryable failures with backoff.
    ///
    /// `deadline` caps the whole exchange; streaming calls pass `None`.
    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        api_key: &str,
        body: &T,
        deadline: Option<Duration>,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.retry.max_retries {
            match self.post_once(url, api_key, body, deadline).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !err.is_retryable() || attempt == self.retry.max_retries {
                        return Err(err);
                    }

                    let delay = backoff_delay(self.retry.retry_base_delay, attempt);
                    warn!(
                        error = %err,
                        code = err.code(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying OpenAI request"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::provider("openai", "unknown error")))
    }

    /// One POST; non-2xx statuses become typed errors.
    async fn post_once<T: Serialize + ?Sized>(
        &self,
        url: &str,
        api_key: &str,
        body: &T,
        deadline: Option<Duration>,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut request = self.client.post(url).bearer_auth(api_key).json(body);
        if let Some(deadline) = deadline {
            request = request.timeout(deadline);
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, deadline.unwrap_or(self.timeout)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let request_id = Self::extract_request_id(response.headers());
        let body = response.text().await.unwrap_or_default();

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = match &request_id {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        };

        let parsed = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.error);
        let (message, ctx) = match parsed {
            Some(error) => {
                let ctx = match error.code {
                    Some(code) => ctx.with_code(code),
                    None => ctx,
                };
                (error.message.unwrap_or_default(), ctx)
            }
            None => (format!("HTTP {}", status.as_u16()), ctx),
        };

        Err(match status.as_u16() {
            429 => ProviderError::rate_limited(Duration::from_secs(60), ctx),
            400 => ProviderError::InvalidRequest {
                message,
                context: Some(ctx),
            },
            _ => ProviderError::provider_with_context("openai", message, ctx),
        })
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ResponsesApiRequest<'a> {
    model: &'a str,
    input: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

impl<'a> ResponsesApiRequest<'a> {
    fn from_request(req: &'a TextRequest, stream: bool) -> Self {
        Self {
            model: &req.model,
            input: req.to_messages().iter().map(ApiMessage::from).collect(),
            stream,
            reasoning: req.reasoning_effort.map(|effort| ReasoningParam {
                effort: effort.as_str(),
            }),
            max_output_tokens: if stream { req.max_output_tokens } else { None },
        }
    }
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for ApiMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content.clone(),
        }
    }
}

#[derive(Serialize)]
struct ReasoningParam {
    effort: &'static str,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Deserialize)]
struct InputTokensResponse {
    input_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    delta: Option<String>,
    message: Option<String>,
    refusal: Option<String>,
    response: Option<StreamEventResponse>,
}

#[derive(Deserialize)]
struct StreamEventResponse {
    error: Option<ApiError>,
}

// =============================================================================
// SSE DECODING
// =============================================================================

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes go in as they arrive; the `data:` payload of every complete event
/// comes out. Multi-byte characters split across chunks are handled because
/// decoding to text only happens per complete event.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(data) = Self::data_of(&block[..pos]) {
                events.push(data);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub(crate) fn finish(&mut self) -> Vec<String> {
        let block = std::mem::take(&mut self.buffer);
        Self::data_of(&block).into_iter().collect()
    }

    fn data_of(block: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(block);
        let lines: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| data.strip_prefix(' ').unwrap_or(data))
            .collect();

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

/// Streaming state: owns the HTTP response until the stream is dropped.
struct DeltaStream {
    response: reqwest::Response,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, ProviderError>>,
    finished: bool,
    read_timeout: Duration,
}

impl DeltaStream {
    fn new(response: reqwest::Response, read_timeout: Duration) -> Self {
        Self {
            response,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
            read_timeout,
        }
    }

    fn handle_frame(&mut self, data: &str) {
        if data == "[DONE]" {
            return;
        }

        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "skipping unparsable stream event");
                return;
            }
        };

        match event.event_type.as_str() {
            "response.output_text.delta" => {
                if let Some(delta) = event.delta.filter(|d| !d.is_empty()) {
                    self.pending.push_back(Ok(delta));
                }
            }
            "response.refusal.done" => {
                let refusal = event.refusal.unwrap_or_else(|| "request was refused".into());
                self.pending.push_back(Err(ProviderError::refused(refusal)));
            }
            "error" => {
                let message = event
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "OpenAI stream failed.".into());
                self.pending.push_back(Err(ProviderError::stream(message)));
            }
            "response.failed" => {
                let message = event
                    .response
                    .and_then(|r| r.error)
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "OpenAI stream failed.".into());
                self.pending.push_back(Err(ProviderError::stream(message)));
            }
            _ => {}
        }
    }

    fn into_stream(self) -> TextStream {
        Box::pin(stream::try_unfold(self, |mut state| async move {
            loop {
                match state.pending.pop_front() {
                    Some(Ok(delta)) => return Ok(Some((delta, state))),
                    Some(Err(err)) => return Err(err),
                    None if state.finished => return Ok(None),
                    None => {}
                }

                let chunk = state
                    .response
                    .chunk()
                    .await
                    .map_err(|e| transport_error(e, state.read_timeout))?;
                let frames = match chunk {
                    Some(bytes) => state.decoder.push(&bytes),
                    None => {
                        state.finished = true;
                        state.decoder.finish()
                    }
                };
                for frame in frames {
                    state.handle_frame(&frame);
                }
            }
        }))
    }
}

// =============================================================================
// TEXT GENERATOR IMPL
// =============================================================================

#[async_trait]
impl TextGenerator for OpenAiAdapter {
    async fn stream_text(&self, req: TextRequest) -> Result<TextStream, ProviderError> {
        Self::validate_input(&req)?;
        let api_key = self.resolve_api_key(req.api_key.as_deref())?;

        let start = Instant::now();
        let payload = ResponsesApiRequest::from_request(&req, true);
        let response = self
            .post(&self.responses_url(), &api_key, &payload, None)
            .await?;

        debug!(
            model = %req.model,
            caller = req.caller,
            latency_ms = start.elapsed().as_millis() as u64,
            "generation stream opened"
        );

        Ok(DeltaStream::new(response, self.timeout).into_stream())
    }

    async fn count_input_tokens(&self, req: &TextRequest) -> Result<u64, ProviderError> {
        Self::validate_input(req)?;
        let api_key = self.resolve_api_key(req.api_key.as_deref())?;

        let payload = ResponsesApiRequest::from_request(req, false);
        let mut response = self
            .post(&self.input_tokens_url(), &api_key, &payload, Some(self.timeout))
            .await?;

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(e, self.timeout))?
        {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    "openai",
                    format!("Response too large: {new_len} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let parsed: InputTokensResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::provider("openai", format!("Invalid JSON: {e}")))?;

        parsed.input_tokens.ok_or_else(|| {
            ProviderError::provider("openai", "OpenAI input token count returned invalid payload.")
        })
    }
}
