//! Collaborators the orchestrator calls out to: the credit ledger and the
//! background post-processing pipeline.

use crate::api::{ChatMessage, GenerationResult};
use crate::error::Result;
use async_trait::async_trait;

/// Answers whether a caller can pay for a request.
///
/// The orchestrator only asks; deducting credits is the caller's job once
/// the response is delivered.
#[async_trait]
pub trait CreditCheck: Send + Sync {
    async fn can_afford(&self, caller: &str, credits: u32) -> Result<bool>;
}

/// A saved conversation handed to background enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    pub caller: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub result: Option<GenerationResult>,
}

/// Background enrichment of a saved conversation, such as title or summary
/// generation and embedding. Runs detached from the response path.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, snapshot: ConversationSnapshot) -> Result<()>;
}
