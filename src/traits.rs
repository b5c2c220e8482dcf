//! The contract every provider adapter satisfies.

use crate::api::{
    ChatMessage, GeneratedImage, GenerationConfig, ImageOptions, Provider, TextCompletion,
};
use crate::error::{GenerationError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// An ordered stream of text deltas from one upstream generation.
///
/// The stream ends after the last delta; an `Err` item ends it early.
pub type TextStream = BoxStream<'static, Result<TextDelta>>;

/// One increment of a streamed generation.
#[derive(Debug, Clone, PartialEq)]
pub enum TextDelta {
    /// Newly generated text, to be appended to what came before.
    Text(String),
    /// The upstream reported why it stopped.
    Finished(crate::api::FinishReason),
}

/// Operations an adapter supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterCapabilities {
    pub text: bool,
    pub streaming: bool,
    pub image: bool,
}

/// One upstream provider behind the uniform generation contract.
///
/// Adapters are registered with
/// [`OrchestratorBuilder::register_adapter`](crate::orchestrator::OrchestratorBuilder::register_adapter)
/// and keyed by [`provider`](ProviderAdapter::provider).
///
/// Every upstream failure must come back as either
/// [`GenerationError::TransientUpstream`] or
/// [`GenerationError::FatalUpstream`]; the retry and fallback logic relies on
/// that classification.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    fn capabilities(&self) -> AdapterCapabilities;

    /// Generate a complete response for `messages`.
    async fn generate_text(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TextCompletion>;

    /// Open a streaming generation. Errors opening the stream are returned
    /// directly; errors after that arrive as stream items.
    async fn stream_text(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TextStream>;

    /// Generate images for `prompt`. Unsupported unless overridden.
    async fn generate_image(
        &self,
        _prompt: &str,
        _config: &GenerationConfig,
        _options: &ImageOptions,
    ) -> Result<Vec<GeneratedImage>> {
        Err(GenerationError::Capability(format!(
            "{} provider does not support image generation",
            self.provider()
        )))
    }
}
