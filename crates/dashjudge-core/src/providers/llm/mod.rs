use crate::errors::ProviderError;
use crate::model::ModelRef;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub mod fake;
pub mod openai;

pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub model: &'a ModelRef,
    /// Optional image URL sent alongside the prompt for multimodal models.
    pub image_ref: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tokens_used: Option<u32>,
    pub latency_ms: u64,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, req: &CompletionRequest<'_>) -> Result<Completion, ProviderError>;
    fn provider_name(&self) -> &'static str;
}

/// Configured models by id, each bound to the client that serves it.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    entries: HashMap<String, (ModelRef, Arc<dyn LlmClient>)>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: ModelRef, client: Arc<dyn LlmClient>) {
        self.entries.insert(model.id.clone(), (model, client));
    }

    pub fn with(mut self, model: ModelRef, client: Arc<dyn LlmClient>) -> Self {
        self.register(model, client);
        self
    }

    pub fn resolve(&self, model_id: &str) -> Option<(&ModelRef, &Arc<dyn LlmClient>)> {
        self.entries
            .get(model_id)
            .map(|(model, client)| (model, client))
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.entries.contains_key(model_id)
    }

    pub fn model_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeClient;
    use super::*;

    fn model(id: &str) -> ModelRef {
        ModelRef {
            id: id.into(),
            provider: "fake".into(),
            model: "fake-1".into(),
            temperature: 0.0,
            max_tokens: 256,
        }
    }

    #[test]
    fn test_registry_resolves_by_id() {
        let reg = ClientRegistry::new()
            .with(model("gen"), Arc::new(FakeClient::new("{}")))
            .with(model("judge"), Arc::new(FakeClient::new("<score>5</score>")));
        assert_eq!(reg.model_ids(), vec!["gen", "judge"]);
        let (m, client) = reg.resolve("judge").unwrap();
        assert_eq!(m.id, "judge");
        assert_eq!(client.provider_name(), "fake");
        assert!(reg.resolve("missing").is_none());
    }
}
