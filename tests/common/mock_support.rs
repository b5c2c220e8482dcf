//! Mock adapter and fixtures shared by the integration tests.

use llm_relay::api::{
    Candidate, ChatMessage, FinishReason, GeneratedImage, GenerationConfig, GenerationRequest,
    ImageOptions, Provider, RetryPolicy, TextCompletion,
};
use llm_relay::catalog::{CatalogEntry, CostTier, Modality, ModelCatalog};
use llm_relay::error::{GenerationError, Result};
use llm_relay::orchestrator::{Orchestrator, OrchestratorBuilder};
use llm_relay::traits::{AdapterCapabilities, ProviderAdapter, TextDelta, TextStream};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of one scripted call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Reply(String),
    Transient,
    RateLimited,
    Fatal,
}

#[derive(Clone)]
pub struct MockAdapter {
    provider: Provider,
    capabilities: AdapterCapabilities,
    reply: String,
    script: Arc<Mutex<VecDeque<Outcome>>>,
    fallback_outcome: Option<Outcome>,
    delay: Option<Duration>,
    delta_delay: Option<Duration>,
    fail_after_deltas: Option<usize>,
    calls: Arc<AtomicU32>,
    last_config: Arc<Mutex<Option<GenerationConfig>>>,
}

impl MockAdapter {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            capabilities: AdapterCapabilities {
                text: true,
                streaming: true,
                image: true,
            },
            reply: "Hello!".to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback_outcome: None,
            delay: None,
            delta_delay: None,
            fail_after_deltas: None,
            calls: Arc::new(AtomicU32::new(0)),
            last_config: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    pub fn with_outcomes(self, outcomes: Vec<Outcome>) -> Self {
        *self.script.lock().unwrap() = outcomes.into();
        self
    }

    /// Outcome of every call after the script is exhausted.
    pub fn always(mut self, outcome: Outcome) -> Self {
        self.fallback_outcome = Some(outcome);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = Some(delay);
        self
    }

    /// Streams end with a transient error after `n` deltas.
    pub fn fail_after_deltas(mut self, n: usize) -> Self {
        self.fail_after_deltas = Some(n);
        self
    }

    pub fn text_only(mut self) -> Self {
        self.capabilities.image = false;
        self
    }

    pub fn without_streaming(mut self) -> Self {
        self.capabilities.streaming = false;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<GenerationConfig> {
        self.last_config.lock().unwrap().clone()
    }

    async fn next_outcome(&self, config: &GenerationConfig) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock().unwrap() = Some(config.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted.or_else(|| self.fallback_outcome.clone()) {
            None => Ok(self.reply.clone()),
            Some(Outcome::Reply(text)) => Ok(text),
            Some(Outcome::Transient) => Err(GenerationError::TransientUpstream {
                provider: self.provider,
                message: "HTTP 503: Service Unavailable".to_string(),
                rate_limited: false,
            }),
            Some(Outcome::RateLimited) => Err(GenerationError::TransientUpstream {
                provider: self.provider,
                message: "HTTP 429: Too Many Requests".to_string(),
                rate_limited: true,
            }),
            Some(Outcome::Fatal) => Err(GenerationError::FatalUpstream {
                provider: self.provider,
                message: "HTTP 401: Invalid API key".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }

    async fn generate_text(
        &self,
        _messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TextCompletion> {
        let content = self.next_outcome(config).await?;
        Ok(TextCompletion {
            content,
            usage: None,
            finish_reason: Some(FinishReason::Stop),
        })
    }

    async fn stream_text(
        &self,
        _messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TextStream> {
        let content = self.next_outcome(config).await?;
        let mut items: Vec<Result<TextDelta>> = content
            .split_inclusive(' ')
            .map(|w| Ok(TextDelta::Text(w.to_string())))
            .collect();
        match self.fail_after_deltas {
            Some(n) => {
                items.truncate(n);
                items.push(Err(GenerationError::TransientUpstream {
                    provider: self.provider,
                    message: "connection reset mid-stream".to_string(),
                    rate_limited: false,
                }));
            }
            None => items.push(Ok(TextDelta::Finished(FinishReason::Stop))),
        }

        let delta_delay = self.delta_delay;
        Ok(stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delta_delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }

    async fn generate_image(
        &self,
        prompt: &str,
        config: &GenerationConfig,
        options: &ImageOptions,
    ) -> Result<Vec<GeneratedImage>> {
        if !self.capabilities.image {
            return Err(GenerationError::Capability("mock has no images".to_string()));
        }
        self.next_outcome(config).await?;
        Ok((0..options.n())
            .map(|i| GeneratedImage {
                url: format!("https://images.test/{}/{}.png", config.model, i),
                revised_prompt: Some(prompt.to_string()),
            })
            .collect())
    }
}

/// Model the fallback tests route to.
pub const FALLBACK_MODEL: &str = "fast-default-model";

/// OpenAI text and image models plus one Google and one Anthropic text model.
pub fn test_catalog() -> ModelCatalog {
    ModelCatalog::from_entries(vec![
        CatalogEntry::new(
            Provider::OpenAi,
            "gpt-4o",
            "GPT-4o",
            Modality::Text,
            CostTier::Expensive,
        ),
        CatalogEntry::text(Provider::OpenAi, "gpt-4o-mini", "GPT-4o mini"),
        CatalogEntry::new(
            Provider::OpenAi,
            "dall-e-3",
            "DALL-E 3",
            Modality::Image,
            CostTier::Image,
        ),
        CatalogEntry::text(Provider::Google, FALLBACK_MODEL, "Fast default"),
        CatalogEntry::text(Provider::Anthropic, "claude-3-5-haiku-latest", "Claude Haiku"),
    ])
    .unwrap()
}

pub fn test_fallbacks() -> Vec<Candidate> {
    vec![
        Candidate::new(Provider::Google, FALLBACK_MODEL),
        Candidate::new(Provider::Anthropic, "claude-3-5-haiku-latest"),
    ]
}

/// Builder with the three mocks registered, the test catalog and fallbacks,
/// and a fast retry policy.
pub fn builder_with(
    openai: &MockAdapter,
    google: &MockAdapter,
    anthropic: &MockAdapter,
) -> OrchestratorBuilder {
    Orchestrator::builder()
        .register_adapter(openai.clone())
        .register_adapter(google.clone())
        .register_adapter(anthropic.clone())
        .catalog(test_catalog())
        .fallbacks(test_fallbacks())
        .retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            jitter_ms: 0,
        })
}

pub fn orchestrator_with(
    openai: &MockAdapter,
    google: &MockAdapter,
    anthropic: &MockAdapter,
) -> Arc<Orchestrator> {
    builder_with(openai, google, anthropic).build().unwrap()
}

pub fn mocks() -> (MockAdapter, MockAdapter, MockAdapter) {
    (
        MockAdapter::new(Provider::OpenAi),
        MockAdapter::new(Provider::Google),
        MockAdapter::new(Provider::Anthropic),
    )
}

pub fn chat_request(provider: Provider, model: &str, prompt: &str) -> GenerationRequest {
    GenerationRequest::new(
        vec![ChatMessage::user(prompt)],
        GenerationConfig::new(provider, model),
    )
}
