//! Multi-provider LLM generation relay.
//!
//! `llm-relay` sends chat and image requests to OpenAI, Anthropic, or Google
//! Gemini through one provider-agnostic API. Transient upstream failures are
//! retried with exponential backoff; when the requested model keeps failing
//! the request falls back to fast, highly available models, and the result
//! reports which model actually served it.
//!
//! # Key concepts
//!
//! - **[`Orchestrator`](orchestrator::Orchestrator)**: validates a request,
//!   consults the credit check, plans candidates, and runs them in order.
//! - **[`ModelCatalog`](catalog::ModelCatalog)**: the set of models the relay
//!   may route to, limited to providers with configured credentials.
//! - **[`ProviderAdapter`](traits::ProviderAdapter)**: one upstream vendor behind
//!   a uniform contract, with failures classified as transient or fatal.
//! - **[`RetryExecutor`](reliability::RetryExecutor)** and
//!   **[`FallbackPlanner`](planner::FallbackPlanner)**: retry in place, then
//!   move on to the next candidate.
//! - **[`StreamEmitter`](stream::StreamEmitter)**: incremental delivery with
//!   cancellation and partial results.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use llm_relay::api::{ChatMessage, GenerationConfig, GenerationRequest, Provider};
//! use llm_relay::config::RelayConfig;
//! use llm_relay::orchestrator::Orchestrator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::from_config(&RelayConfig::default())?;
//!
//! let request = GenerationRequest::new(
//!     vec![ChatMessage::user("Say hello")],
//!     GenerationConfig::new(Provider::OpenAi, "gpt-4o"),
//! );
//! let result = orchestrator.generate(&request).await?;
//! println!("{} (served by {})", result.content, result.served_by);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod hooks;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod reliability;
pub mod stream;
pub mod traits;

#[cfg(test)]
mod mock;
