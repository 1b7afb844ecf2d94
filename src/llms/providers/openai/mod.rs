//! OpenAI-compatible chat completion provider.
//!
//! Talks to any endpoint implementing `POST {base_url}/chat/completions`
//! (OpenAI, Zhipu, ModelScope, vLLM, Ollama, ...) via `reqwest`.
//!
//! # Features
//!
//! - JSON responses and SSE streaming
//! - Retries with exponential backoff on transport errors, 429 and 5xx
//! - Per-request timeout
//! - Optional `response_format: json_object`

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use crate::config::LlmSettings;
use crate::llms::base_llm::{Completion, CompletionError, CompletionOptions, Turn};
use crate::llms::streaming::{delta_content, SseDecoder, SseEvent, TextStream};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// OpenAiCompatible
// ---------------------------------------------------------------------------

/// Chat completion client for OpenAI-compatible APIs.
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    model: String,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
    /// Applied where the per-call options leave a field unset.
    defaults: CompletionOptions,
    client: reqwest::Client,
}

impl OpenAiCompatible {
    pub fn new(
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, CompletionError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let model = model.into();
        let base_url = base_url.into();
        if api_key.is_none() {
            log::warn!("No API key configured for completion model {}", model);
        }
        log::info!("Completion client ready - model: {}, base url: {}", model, base_url);
        Ok(Self {
            model,
            base_url,
            api_key,
            max_retries: 2,
            retry_delay: DEFAULT_RETRY_DELAY,
            defaults: CompletionOptions::default(),
            client: builder.build()?,
        })
    }

    pub fn from_settings(settings: &LlmSettings) -> Result<Self, CompletionError> {
        let mut client = Self::new(
            settings.model.clone(),
            settings.base_url.clone(),
            settings.api_key.clone(),
            settings.timeout,
        )?;
        client.max_retries = settings.max_retries;
        client.defaults = CompletionOptions {
            temperature: Some(settings.temperature),
            max_tokens: settings.max_tokens,
            ..CompletionOptions::default()
        };
        Ok(client)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_defaults(mut self, defaults: CompletionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Request body for `turns`, merging `options` over the defaults.
    pub fn build_request_body(&self, turns: &[Turn], options: &CompletionOptions, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": turns,
        });
        if let Some(t) = options.temperature.or(self.defaults.temperature) {
            body["temperature"] = json!(t);
        }
        if let Some(n) = options.max_tokens.or(self.defaults.max_tokens) {
            body["max_tokens"] = json!(n);
        }
        let stop = if options.stop.is_empty() {
            &self.defaults.stop
        } else {
            &options.stop
        };
        if !stop.is_empty() {
            body["stop"] = json!(stop);
        }
        if options.json_mode || self.defaults.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// POST `body`, retrying transport errors, 429 and 5xx.
    async fn post_with_retries(&self, body: &Value) -> Result<reqwest::Response, CompletionError> {
        let api_key = self.api_key.as_deref().ok_or(CompletionError::MissingApiKey)?;
        let endpoint = self.endpoint();
        let mut delay = self.retry_delay;
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                log::warn!("Completion retry attempt {} after {:?}: {}", attempt, delay, last_error);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            let response = match self
                .client
                .post(&endpoint)
                .bearer_auth(api_key)
                .json(body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_error = format!("provider returned {}", status);
                continue;
            }
            if status.is_client_error() {
                let body = response.text().await.unwrap_or_default();
                return Err(CompletionError::Status {
                    status: status.as_u16(),
                    body: truncate(&body, 500),
                });
            }
            return Ok(response);
        }

        Err(CompletionError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }
}

/// Assistant text of a non-streaming chat completion response.
pub fn parse_completion_response(response: &Value) -> Result<String, CompletionError> {
    if let Some(err) = response.get("error") {
        let msg = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown provider error");
        return Err(CompletionError::InvalidResponse(msg.to_string()));
    }

    let message = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| CompletionError::InvalidResponse("no choices in response".into()))?;

    if let Some(usage) = response.get("usage") {
        log::debug!(
            "Token usage: prompt={}, completion={}, total={}",
            usage.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0),
            usage.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0),
            usage.get("total_tokens").and_then(Value::as_i64).unwrap_or(0),
        );
    }

    Ok(message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl Completion for OpenAiCompatible {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, turns: &[Turn], options: &CompletionOptions) -> Result<String, CompletionError> {
        log::debug!("Completion request - model: {}, turns: {}", self.model, turns.len());
        let body = self.build_request_body(turns, options, false);
        let response = self.post_with_retries(&body).await?;
        let text = response.text().await?;
        let parsed: Value = serde_json::from_str(&text).map_err(|e| {
            CompletionError::InvalidResponse(format!("{} - body: {}", e, truncate(&text, 500)))
        })?;
        parse_completion_response(&parsed)
    }

    async fn stream(&self, turns: &[Turn], options: &CompletionOptions) -> Result<TextStream, CompletionError> {
        log::debug!("Streaming request - model: {}, turns: {}", self.model, turns.len());
        let body = self.build_request_body(turns, options, true);
        let response = self.post_with_retries(&body).await?;

        let state = (
            Box::pin(response.bytes_stream()),
            SseDecoder::new(),
            VecDeque::<String>::new(),
            false,
        );
        let fragments = stream::unfold(state, |(mut bytes, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(fragment) = pending.pop_front() {
                    return Some((Ok(fragment), (bytes, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                let events = match bytes.next().await {
                    Some(Ok(chunk)) => decoder.feed(&chunk),
                    Some(Err(e)) => {
                        done = true;
                        return Some((Err(CompletionError::Http(e)), (bytes, decoder, pending, done)));
                    }
                    None => {
                        done = true;
                        decoder.finish().into_iter().collect()
                    }
                };
                for event in events {
                    match event {
                        SseEvent::Done => {
                            done = true;
                            break;
                        }
                        SseEvent::Data(data) => match serde_json::from_str::<Value>(&data) {
                            Ok(chunk) => pending.extend(delta_content(&chunk)),
                            Err(e) => log::warn!("Skipping malformed stream chunk: {}", e),
                        },
                    }
                }
            }
        });
        Ok(Box::pin(fragments))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::streaming::collect_text;
    use axum::{http::StatusCode, response::IntoResponse, routing::post, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn client(base_url: &str) -> OpenAiCompatible {
        OpenAiCompatible::new("test-model", base_url, Some("sk-test".into()), Some(Duration::from_secs(5)))
            .unwrap()
            .with_retry_delay(Duration::from_millis(10))
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let c = client("https://api.example.com/v1/");
        assert_eq!(c.endpoint(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_request_body_merges_defaults() {
        let c = client("http://x").with_defaults(CompletionOptions {
            temperature: Some(0.7),
            max_tokens: Some(4096),
            ..Default::default()
        });
        let turns = vec![Turn::system("sys"), Turn::user("hi")];
        let body = c.build_request_body(&turns, &CompletionOptions::default().with_temperature(0.1).json(), true);

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["temperature"], 0.1);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["stream"], true);
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn test_parse_completion_response() {
        let ok = json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]});
        assert_eq!(parse_completion_response(&ok).unwrap(), "hello");

        let err = json!({"error": {"message": "bad key"}});
        assert!(matches!(
            parse_completion_response(&err),
            Err(CompletionError::InvalidResponse(m)) if m == "bad key"
        ));

        assert!(parse_completion_response(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let c = OpenAiCompatible::new("m", "http://127.0.0.1:9", None, None).unwrap();
        let err = c.complete(&[Turn::user("hi")], &CompletionOptions::default()).await.unwrap_err();
        assert!(matches!(err, CompletionError::MissingApiKey));
    }

    #[tokio::test]
    async fn test_complete_against_local_server() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|axum::Json(body): axum::Json<Value>| async move {
                let last = body["messages"][0]["content"].as_str().unwrap_or("").to_string();
                axum::Json(json!({"choices": [{"message": {"content": format!("echo: {}", last)}}]}))
            }),
        );
        let base = serve(app).await;
        let text = client(&base)
            .complete(&[Turn::user("ping")], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "echo: ping");
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        StatusCode::SERVICE_UNAVAILABLE.into_response()
                    } else {
                        axum::Json(json!({"choices": [{"message": {"content": "ok"}}]})).into_response()
                    }
                }
            }),
        );
        let base = serve(app).await;
        let text = client(&base)
            .complete(&[Turn::user("x")], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { (StatusCode::UNAUTHORIZED, "invalid key") }
            }),
        );
        let base = serve(app).await;
        let err = client(&base)
            .complete(&[Turn::user("x")], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Status { status: 401, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_against_local_server() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                let body = concat!(
                    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                    "data: [DONE]\n\n",
                );
                ([("content-type", "text/event-stream")], body)
            }),
        );
        let base = serve(app).await;
        let stream = client(&base)
            .stream(&[Turn::user("x")], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(collect_text(stream).await.unwrap(), "Hello");
    }
}
