#![allow(dead_code)]

//! Mock adapter for unit tests.
//!
//! Outcomes are scripted per call; once the script runs out every call
//! succeeds with the configured reply. Clones share counters.

use crate::api::{
    ChatMessage, FinishReason, GeneratedImage, GenerationConfig, ImageOptions, Provider,
    TextCompletion,
};
use crate::error::{GenerationError, Result};
use crate::traits::{AdapterCapabilities, ProviderAdapter, TextDelta, TextStream};
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
            Some(Outcome::Transient) => Err(GenerationError::transient(
                self.provider,
                "HTTP 503: Service Unavailable",
            )),
            Some(Outcome::RateLimited) => Err(GenerationError::rate_limited(
                self.provider,
                "HTTP 429: Too Many Requests",
            )),
            Some(Outcome::Fatal) => Err(GenerationError::fatal(
                self.provider,
                "HTTP 401: Invalid API key",
            )),
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
                items.push(Err(GenerationError::transient(
                    self.provider,
                    "connection reset mid-stream",
                )));
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
