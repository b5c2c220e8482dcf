//! Image generation, credit checks, and background post-processing.

mod common;
use async_trait::async_trait;
use common::mock_support::{MockAdapter, Outcome, builder_with, chat_request, mocks, orchestrator_with};
use llm_relay::api::{
    ChatMessage, GenerationConfig, ImageGenerationRequest, ImageOptions, Provider, RetryPolicy,
};
use llm_relay::error::{GenerationError, Result};
use llm_relay::hooks::{ConversationSnapshot, CreditCheck, PostProcessor};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn image_request(n: u32) -> ImageGenerationRequest {
    ImageGenerationRequest {
        prompt: "a lighthouse at dusk".to_string(),
        config: GenerationConfig::new(Provider::OpenAi, "dall-e-3"),
        options: ImageOptions {
            n: Some(n),
            ..ImageOptions::default()
        },
        caller: Some("user-1".to_string()),
    }
}

#[tokio::test]
async fn test_image_generation_returns_images() {
    let (openai, google, anthropic) = mocks();
    let orch = orchestrator_with(&openai, &google, &anthropic);

    let response = orch.generate_image(&image_request(2)).await.unwrap();

    assert_eq!(response.images.len(), 2);
    assert_eq!(response.served_by.model, "dall-e-3");
    assert_eq!(
        response.images[0].revised_prompt.as_deref(),
        Some("a lighthouse at dusk")
    );
}

#[tokio::test(start_paused = true)]
async fn test_image_generation_has_no_fallback() {
    let (openai, google, anthropic) = mocks();
    let openai = openai.always(Outcome::RateLimited);
    let orch = orchestrator_with(&openai, &google, &anthropic);

    let err = orch.generate_image(&image_request(1)).await.unwrap_err();

    assert!(matches!(
        err,
        GenerationError::AllCandidatesExhausted {
            rate_limited: true,
            ..
        }
    ));
    assert_eq!(openai.call_count(), 3, "retries still apply");
    assert_eq!(google.call_count() + anthropic.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_image_backoff() {
    let (openai, google, anthropic) = mocks();
    let openai = openai.always(Outcome::RateLimited);
    let orch = builder_with(&openai, &google, &anthropic)
        .retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 30_000,
            jitter_ms: 0,
        })
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let start = tokio::time::Instant::now();
    let err = orch
        .generate_image_with_cancel(&image_request(1), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Cancelled));
    assert_eq!(openai.call_count(), 1);
    assert!(start.elapsed() < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_in_flight_image_call() {
    let (openai, google, anthropic) = mocks();
    let openai = openai.with_delay(Duration::from_secs(60));
    let orch = orchestrator_with(&openai, &google, &anthropic);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = orch
        .generate_image_with_cancel(&image_request(1), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Cancelled));
    assert_eq!(openai.call_count(), 1);
}

#[tokio::test]
async fn test_text_model_rejected_for_images() {
    let (openai, google, anthropic) = mocks();
    let orch = orchestrator_with(&openai, &google, &anthropic);
    let mut request = image_request(1);
    request.config.model = "gpt-4o".to_string();

    let err = orch.generate_image(&request).await.unwrap_err();
    assert!(matches!(err, GenerationError::Validation(_)));
    assert_eq!(openai.call_count(), 0);
}

#[tokio::test]
async fn test_image_on_text_only_provider_is_capability_error() {
    let (_, google, anthropic) = mocks();
    let openai = MockAdapter::new(Provider::OpenAi).text_only();
    let orch = orchestrator_with(&openai, &google, &anthropic);

    let err = orch.generate_image(&image_request(1)).await.unwrap_err();
    assert!(matches!(err, GenerationError::Capability(_)));
}

/// Grants a fixed balance per caller and records what was asked. Clones
/// share the record.
#[derive(Clone)]
struct FixedBalance {
    balance: u32,
    asked: Arc<Mutex<Vec<(String, u32)>>>,
}

impl FixedBalance {
    fn new(balance: u32) -> Self {
        Self {
            balance,
            asked: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl CreditCheck for FixedBalance {
    async fn can_afford(&self, caller: &str, credits: u32) -> Result<bool> {
        self.asked.lock().unwrap().push((caller.to_string(), credits));
        Ok(credits <= self.balance)
    }
}

#[tokio::test]
async fn test_insufficient_credits_blocks_before_any_call() {
    let (openai, google, anthropic) = mocks();
    let ledger = FixedBalance::new(2);
    let orch = builder_with(&openai, &google, &anthropic)
        .credit_check(ledger.clone())
        .build()
        .unwrap();

    // gpt-4o is an expensive model: 3 credits.
    let request = chat_request(Provider::OpenAi, "gpt-4o", "Hi").with_caller("user-1");
    let err = orch.generate(&request).await.unwrap_err();

    assert!(matches!(err, GenerationError::InsufficientCredits { required: 3 }));
    assert_eq!(openai.call_count(), 0);
    assert_eq!(
        ledger.asked.lock().unwrap().as_slice(),
        &[("user-1".to_string(), 3)]
    );

    // Cheap model fits the balance.
    let request = chat_request(Provider::OpenAi, "gpt-4o-mini", "Hi").with_caller("user-1");
    assert!(orch.generate(&request).await.is_ok());

    // Images cost 5.
    let err = orch.generate_image(&image_request(1)).await.unwrap_err();
    assert!(matches!(err, GenerationError::InsufficientCredits { required: 5 }));
}

#[tokio::test]
async fn test_credit_check_requires_caller() {
    let (openai, google, anthropic) = mocks();
    let orch = builder_with(&openai, &google, &anthropic)
        .credit_check(FixedBalance::new(100))
        .build()
        .unwrap();

    let err = orch
        .generate(&chat_request(Provider::OpenAi, "gpt-4o-mini", "Hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Validation(_)));
}

struct CountingProcessor {
    runs: AtomicU32,
    fail: bool,
}

#[async_trait]
impl PostProcessor for CountingProcessor {
    fn name(&self) -> &str {
        "counting"
    }

    async fn process(&self, snapshot: ConversationSnapshot) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        assert_eq!(snapshot.messages.len(), 1);
        if self.fail {
            return Err(GenerationError::Config("summary model missing".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_post_processing_runs_detached_and_swallows_errors() {
    let (openai, google, anthropic) = mocks();
    let orch = orchestrator_with(&openai, &google, &anthropic);
    let request = chat_request(Provider::OpenAi, "gpt-4o", "Hi");
    let result = orch.generate(&request).await.unwrap();

    for fail in [false, true] {
        let processor = Arc::new(CountingProcessor {
            runs: AtomicU32::new(0),
            fail,
        });
        let snapshot = ConversationSnapshot {
            conversation_id: "conv-1".to_string(),
            caller: Some("user-1".to_string()),
            messages: vec![ChatMessage::user("Hi")],
            result: Some(result.clone()),
        };

        let handle = orch.spawn_post_processing(processor.clone(), snapshot);
        handle.await.unwrap();
        assert_eq!(processor.runs.load(Ordering::SeqCst), 1);
    }
}
