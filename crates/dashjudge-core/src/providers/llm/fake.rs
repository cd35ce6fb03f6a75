use super::{Completion, CompletionRequest, LlmClient};
use crate::errors::ProviderError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Deterministic client: pops scripted outcomes in order, then answers with the
/// fallback forever. Records every prompt it receives.
pub struct FakeClient {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl FakeClient {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Scripted responses; the last one doubles as the fallback.
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script: VecDeque<Result<String, ProviderError>> =
            responses.into_iter().map(|s| Ok(s.into())).collect();
        let fallback = match script.back() {
            Some(Ok(last)) => last.clone(),
            _ => String::new(),
        };
        Self {
            script: Mutex::new(script),
            ..Self::new(fallback)
        }
    }

    pub fn then_ok(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()))
    }

    pub fn then_err(self, err: ProviderError) -> Self {
        self.push(Err(err))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }

    fn push(self, outcome: Result<String, ProviderError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
        self
    }
}

fn poisoned() -> ProviderError {
    ProviderError::Unknown("fake client state poisoned".into())
}

#[async_trait]
impl LlmClient for FakeClient {
    async fn complete(&self, req: &CompletionRequest<'_>) -> Result<Completion, ProviderError> {
        self.prompts
            .lock()
            .map_err(|_| poisoned())?
            .push(req.prompt.to_string());
        let next = self.script.lock().map_err(|_| poisoned())?.pop_front();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let content = match next {
            Some(outcome) => outcome?,
            None => self.fallback.clone(),
        };
        let tokens_used = Some(content.split_whitespace().count() as u32);
        Ok(Completion {
            content,
            tokens_used,
            latency_ms: self.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}
