//! HTTP adapters for the supported upstream vendors.
//!
//! Each adapter is gated behind a Cargo feature flag; all three are enabled by
//! default.
//!
//! | Module | Feature | API |
//! |--------|---------|-----|
//! | `openai` | `provider-openai` | OpenAI chat completions and image generation |
//! | `anthropic` | `provider-anthropic` | Anthropic Messages |
//! | `gemini` | `provider-gemini` | Google Gemini |

#[cfg(any(
    feature = "provider-openai",
    feature = "provider-gemini",
    feature = "provider-anthropic",
))]
pub(crate) mod remote_common;

#[cfg(feature = "provider-openai")]
pub mod openai;

#[cfg(feature = "provider-anthropic")]
pub mod anthropic;

#[cfg(feature = "provider-gemini")]
pub mod gemini;

#[cfg(feature = "provider-openai")]
pub use openai::OpenAiAdapter;

#[cfg(feature = "provider-anthropic")]
pub use anthropic::AnthropicAdapter;

#[cfg(feature = "provider-gemini")]
pub use gemini::GeminiAdapter;

use crate::api::Provider;
use crate::config::RelayConfig;
use crate::traits::ProviderAdapter;
use std::sync::Arc;

/// Build an adapter for every enabled provider that has credentials in the
/// environment. Providers without a key are skipped with a log line.
pub fn adapters_from_config(config: &RelayConfig) -> Vec<Arc<dyn ProviderAdapter>> {
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    for provider in config.credentialed_providers() {
        let built: crate::error::Result<Arc<dyn ProviderAdapter>> = match provider {
            #[cfg(feature = "provider-openai")]
            Provider::OpenAi => OpenAiAdapter::from_config(config).map(|a| Arc::new(a) as _),
            #[cfg(feature = "provider-anthropic")]
            Provider::Anthropic => {
                AnthropicAdapter::from_config(config).map(|a| Arc::new(a) as _)
            }
            #[cfg(feature = "provider-gemini")]
            Provider::Google => GeminiAdapter::from_config(config).map(|a| Arc::new(a) as _),
            #[allow(unreachable_patterns)]
            other => {
                tracing::debug!(provider = %other, "Provider support not compiled in");
                continue;
            }
        };
        match built {
            Ok(adapter) => adapters.push(adapter),
            Err(e) => tracing::warn!(provider = %provider, error = %e, "Skipping provider"),
        }
    }
    adapters
}
