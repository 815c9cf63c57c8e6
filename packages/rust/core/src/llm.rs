//! Model client: one uniform way to invoke a chat-completion model.
//!
//! [`OpenAiClient`] speaks the OpenAI-compatible `/chat/completions`
//! protocol, which self-hosted servers (vLLM, llama.cpp, Ollama) expose
//! as well. No caching happens at this layer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use paperbrief_shared::{AppConfig, PaperBriefError};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// User-Agent string for model API requests.
const USER_AGENT: &str = concat!("paperbrief/", env!("CARGO_PKG_VERSION"));

/// Upper bound for any single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Request / response / error
// ---------------------------------------------------------------------------

/// One model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Ask the endpoint for a JSON object response.
    pub json_mode: bool,
}

/// Generated text plus token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelResponse {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Why an invocation failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Upstream throttling. Callers back off and retry a few times.
    #[error("rate limited by model API")]
    RateLimited { retry_after: Option<Duration> },

    /// Empty or malformed completion.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error("model call timed out")]
    Timeout,

    /// Transport failure or non-success status other than 429.
    #[error("model API unavailable: {0}")]
    Upstream(String),
}

impl From<ModelError> for PaperBriefError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Timeout => PaperBriefError::Timeout(e.to_string()),
            other => PaperBriefError::upstream(other.to_string()),
        }
    }
}

/// Receives incremental text while a streaming call is in flight.
pub type DeltaSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Uniform interface to a language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Like [`ModelClient::invoke`], but reports text as it arrives.
    /// Clients without streaming support deliver the whole text at once.
    async fn invoke_streaming(
        &self,
        request: &ModelRequest,
        on_delta: DeltaSink<'_>,
    ) -> Result<ModelResponse, ModelError> {
        let response = self.invoke(request).await?;
        on_delta(&response.text);
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Per-invocation timeout and throttling retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub call_timeout: Duration,
    pub rate_limit_retries: u32,
    pub backoff_base: Duration,
}

impl From<&AppConfig> for RetryPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            call_timeout: Duration::from_secs(config.llm.request_timeout_secs),
            rate_limit_retries: config.llm.rate_limit_retries,
            backoff_base: Duration::from_millis(config.llm.backoff_base_ms),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base, 2x base, 4x base, ... capped at 30s.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Invoke with a per-call timeout, retrying `RateLimited` with backoff.
/// Other failures are returned to the caller immediately.
pub async fn invoke_with_retry(
    client: &dyn ModelClient,
    request: &ModelRequest,
    policy: &RetryPolicy,
    on_delta: Option<DeltaSink<'_>>,
) -> Result<ModelResponse, ModelError> {
    let mut attempt = 0u32;
    loop {
        let call = async {
            match on_delta {
                Some(sink) => client.invoke_streaming(request, sink).await,
                None => client.invoke(request).await,
            }
        };
        let result = tokio::time::timeout(policy.call_timeout, call)
            .await
            .unwrap_or(Err(ModelError::Timeout));

        match result {
            Err(ModelError::RateLimited { retry_after }) if attempt < policy.rate_limit_retries => {
                attempt += 1;
                let delay = retry_after
                    .map(|d| d.min(MAX_BACKOFF))
                    .unwrap_or_else(|| policy.backoff_duration(attempt));
                warn!(
                    model = %request.model,
                    attempt,
                    max = policy.rate_limit_retries,
                    delay_ms = delay.as_millis() as u64,
                    "model API throttled, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP client
// ---------------------------------------------------------------------------

/// Connection settings for [`OpenAiClient`].
#[derive(Debug, Clone)]
pub struct ModelClientConfig {
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer token. Keyless endpoints leave this empty.
    pub api_key: Option<String>,
    /// HTTP-level timeout.
    pub timeout: Duration,
}

impl From<&AppConfig> for ModelClientConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.llm.base_url.clone(),
            api_key: None,
            timeout: Duration::from_secs(config.llm.request_timeout_secs),
        }
    }
}

impl ModelClientConfig {
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

/// Client for any `/chat/completions` endpoint.
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: ModelClientConfig) -> paperbrief_shared::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaperBriefError::internal(format!("failed to build HTTP client: {e}")))?;

        let endpoint = if config.base_url.ends_with('/') {
            format!("{}chat/completions", config.base_url)
        } else {
            format!("{}/chat/completions", config.base_url)
        };

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
        })
    }

    fn body(request: &ModelRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ModelError> {
        let mut builder = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::Upstream(format!("{}: {e}", self.endpoint))
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ModelError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(ModelError::Upstream(format!("HTTP {status}: {snippet}")));
        }
        Ok(response)
    }
}

fn read_err(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Upstream(format!("failed to read body: {e}"))
    }
}

/// Usage counters, falling back to a rough chars/4 estimate when the
/// endpoint does not report them.
fn usage_from(usage: &Value, request: &ModelRequest, text: &str) -> (u64, u64) {
    let tokens_in = usage["prompt_tokens"]
        .as_u64()
        .unwrap_or_else(|| estimate_tokens(&request.system) + estimate_tokens(&request.prompt));
    let tokens_out = usage["completion_tokens"]
        .as_u64()
        .unwrap_or_else(|| estimate_tokens(text));
    (tokens_in, tokens_out)
}

fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Accumulated state of one streamed completion.
#[derive(Default)]
struct SseState {
    text: String,
    usage: Value,
    done: bool,
}

impl SseState {
    fn line(&mut self, line: &str, on_delta: DeltaSink<'_>) -> Result<(), ModelError> {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }
        let event: Value = serde_json::from_str(data)
            .map_err(|e| ModelError::InvalidResponse(format!("bad stream event: {e}")))?;
        if let Some(delta) = event["choices"][0]["delta"]["content"].as_str() {
            if !delta.is_empty() {
                self.text.push_str(delta);
                on_delta(delta);
            }
        }
        if event["usage"].is_object() {
            self.usage = event["usage"].clone();
        }
        Ok(())
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let started = Instant::now();
        let response = self.send(&Self::body(request, false)).await?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("failed to parse JSON: {e}")))?;

        let text = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if text.trim().is_empty() {
            return Err(ModelError::InvalidResponse("empty completion".into()));
        }

        let (tokens_in, tokens_out) = usage_from(&json["usage"], request, &text);
        debug!(
            model = %request.model,
            tokens_in,
            tokens_out,
            latency_ms = started.elapsed().as_millis() as u64,
            "model call complete"
        );
        Ok(ModelResponse {
            text,
            tokens_in,
            tokens_out,
        })
    }

    async fn invoke_streaming(
        &self,
        request: &ModelRequest,
        on_delta: DeltaSink<'_>,
    ) -> Result<ModelResponse, ModelError> {
        let mut response = self.send(&Self::body(request, true)).await?;

        let mut stream = SseState::default();
        let mut pending: Vec<u8> = Vec::new();

        while !stream.done {
            let Some(chunk) = response.chunk().await.map_err(read_err)? else {
                break;
            };
            pending.extend_from_slice(&chunk);

            // Server-sent events are newline-delimited `data: {...}` lines.
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                stream.line(&String::from_utf8_lossy(&line), on_delta)?;
                if stream.done {
                    break;
                }
            }
        }
        // The last event may arrive without a trailing newline.
        if !stream.done && !pending.is_empty() {
            stream.line(&String::from_utf8_lossy(&pending), on_delta)?;
        }

        let SseState { text, usage, .. } = stream;
        if text.trim().is_empty() {
            return Err(ModelError::InvalidResponse("empty completion".into()));
        }
        let (tokens_in, tokens_out) = usage_from(&usage, request, &text);
        Ok(ModelResponse {
            text,
            tokens_in,
            tokens_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ModelRequest {
        ModelRequest {
            model: "gpt-4o-mini".into(),
            system: "system".into(),
            prompt: "prompt".into(),
            temperature: 0.2,
            max_tokens: 800,
            json_mode: true,
        }
    }

    fn client(server: &MockServer, api_key: Option<&str>) -> OpenAiClient {
        OpenAiClient::new(ModelClientConfig {
            base_url: format!("{}/v1", server.uri()),
            api_key: api_key.map(String::from),
            timeout: Duration::from_secs(5),
        })
        .expect("build client")
    }

    fn completion(content: &str) -> Value {
        json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 45 }
        })
    }

    #[tokio::test]
    async fn invoke_parses_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "response_format": { "type": "json_object" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"ok\":true}")))
            .mount(&server)
            .await;

        let response = client(&server, Some("sk-test"))
            .invoke(&request())
            .await
            .expect("invoke");
        assert_eq!(response.text, "{\"ok\":true}");
        assert_eq!(response.tokens_in, 120);
        assert_eq!(response.tokens_out, 45);
    }

    #[tokio::test]
    async fn keyless_endpoint_works() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "你好，世界" } }]
            })))
            .mount(&server)
            .await;

        let response = client(&server, None).invoke(&request()).await.expect("invoke");
        assert_eq!(response.text, "你好，世界");
        // No usage block: estimated from text length.
        assert_eq!(response.tokens_out, 2);
        assert!(response.tokens_in > 0);
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("   ")))
            .mount(&server)
            .await;

        let client = client(&server, Some("k"));
        assert_eq!(
            client.invoke(&request()).await,
            Err(ModelError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            })
        );
        assert!(matches!(
            client.invoke(&request()).await,
            Err(ModelError::Upstream(msg)) if msg.contains("502")
        ));
        assert!(matches!(
            client.invoke(&request()).await,
            Err(ModelError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn http_timeout_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("late"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = OpenAiClient::new(ModelClientConfig {
            base_url: server.uri(),
            api_key: None,
            timeout: Duration::from_millis(50),
        })
        .expect("build client");
        assert_eq!(client.invoke(&request()).await, Err(ModelError::Timeout));
    }

    #[tokio::test]
    async fn streaming_collects_deltas_and_usage() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"intro\\\":\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\\\"簡介\\\"}\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":300,\"completion_tokens\":12}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "stream": true })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let seen = Mutex::new(Vec::<String>::new());
        let sink = |delta: &str| seen.lock().expect("lock").push(delta.to_string());
        let response = client(&server, None)
            .invoke_streaming(&request(), &sink)
            .await
            .expect("stream");

        assert_eq!(response.text, "{\"intro\":\"簡介\"}");
        assert_eq!(response.tokens_in, 300);
        assert_eq!(response.tokens_out, 12);
        assert_eq!(seen.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn streaming_keeps_an_unterminated_final_event() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"intro\\\":\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\\\"簡介\\\"}\"}}]}",
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "stream": true })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let sink = |_: &str| {};
        let response = client(&server, None)
            .invoke_streaming(&request(), &sink)
            .await
            .expect("stream");
        assert_eq!(response.text, "{\"intro\":\"簡介\"}");
    }

    struct Throttled {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl ModelClient for Throttled {
        async fn invoke(&self, _request: &ModelRequest) -> Result<ModelResponse, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(ModelError::RateLimited { retry_after: None })
            } else {
                Ok(ModelResponse {
                    text: "ok".into(),
                    tokens_in: 1,
                    tokens_out: 1,
                })
            }
        }
    }

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            call_timeout: Duration::from_secs(5),
            rate_limit_retries: retries,
            backoff_base: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn rate_limited_calls_are_retried() {
        let client = Throttled {
            calls: AtomicU32::new(0),
            fail_times: 2,
        };
        let response = invoke_with_retry(&client, &request(), &policy(3), None)
            .await
            .expect("eventually succeeds");
        assert_eq!(response.text, "ok");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let client = Throttled {
            calls: AtomicU32::new(0),
            fail_times: 10,
        };
        let err = invoke_with_retry(&client, &request(), &policy(2), None)
            .await
            .expect_err("gives up");
        assert!(matches!(err, ModelError::RateLimited { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    struct Slow;

    #[async_trait]
    impl ModelClient for Slow {
        async fn invoke(&self, _request: &ModelRequest) -> Result<ModelResponse, ModelError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ModelResponse::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_timeout_applies() {
        let mut policy = policy(0);
        policy.call_timeout = Duration::from_secs(1);
        let err = invoke_with_retry(&Slow, &request(), &policy, None)
            .await
            .expect_err("times out");
        assert_eq!(err, ModelError::Timeout);
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_secs(1),
            rate_limit_retries: 3,
            backoff_base: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff_duration(20), MAX_BACKOFF);
    }
}
