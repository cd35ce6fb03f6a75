use super::{Completion, CompletionRequest, LlmClient};
use crate::errors::ProviderError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for any chat-completions compatible endpoint.
pub struct OpenAIClient {
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unknown(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            timeout,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Unknown(e.to_string())
        }
    }
}

pub(crate) fn request_body(req: &CompletionRequest<'_>) -> Value {
    let content = match req.image_ref {
        Some(url) => json!([
            {"type": "text", "text": req.prompt},
            {"type": "image_url", "image_url": {"url": url}}
        ]),
        None => json!(req.prompt),
    };
    json!({
        "model": req.model.model,
        "messages": [{"role": "user", "content": content}],
        "temperature": req.model.temperature,
        "max_tokens": req.model.max_tokens,
    })
}

pub(crate) fn parse_response(body: &Value) -> Result<(String, Option<u32>), ProviderError> {
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidResponse("response missing message content".into()))?;
    let tokens = body
        .pointer("/usage/total_tokens")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());
    Ok((content.to_string(), tokens))
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, req: &CompletionRequest<'_>) -> Result<Completion, ProviderError> {
        let started = Instant::now();
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request_body(req))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(match ProviderError::from_status(status.as_u16(), &body) {
                ProviderError::RateLimited { .. } => ProviderError::RateLimited { retry_after },
                ProviderError::Timeout(_) => ProviderError::Timeout(self.timeout),
                other => other,
            });
        }

        let body: Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::InvalidResponse(e.to_string())
            }
        })?;
        let (content, tokens_used) = parse_response(&body)?;

        Ok(Completion {
            content,
            tokens_used,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
