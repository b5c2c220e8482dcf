//! The generation orchestrator: validation, credit check, candidate planning,
//! retries, and fallback for a single request.

use crate::api::{
    Candidate, GenerationRequest, GenerationResult, ImageGenerationRequest,
    ImageGenerationResponse, ImageOptions, Provider, RetryPolicy,
};
use crate::catalog::{Modality, ModelCatalog, ModelInfo};
use crate::config::{DEFAULT_REQUEST_TIMEOUT_SECS, RelayConfig, default_fallbacks};
use crate::error::{GenerationError, Result};
use crate::hooks::{ConversationSnapshot, CreditCheck, PostProcessor};
use crate::planner::FallbackPlanner;
use crate::reliability::RetryExecutor;
use crate::traits::ProviderAdapter;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Routes generation requests to provider adapters.
///
/// Holds only immutable state after [`build`](OrchestratorBuilder::build) and
/// is shared via `Arc` across concurrent requests.
pub struct Orchestrator {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    catalog: Arc<ModelCatalog>,
    planner: FallbackPlanner,
    executor: RetryExecutor,
    credit_check: Option<Arc<dyn CreditCheck>>,
    request_timeout: Option<Duration>,
}

impl Orchestrator {
    /// Create a new [`OrchestratorBuilder`].
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Build an orchestrator with an HTTP adapter for every provider whose
    /// credentials are present in the environment.
    pub fn from_config(config: &RelayConfig) -> Result<Arc<Self>> {
        let mut builder = Self::builder()
            .config(config)
            .catalog(ModelCatalog::from_config(config));
        for adapter in crate::provider::adapters_from_config(config) {
            builder = builder.register_shared(adapter);
        }
        builder.build()
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn planner(&self) -> &FallbackPlanner {
        &self.planner
    }

    pub(crate) fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    pub(crate) fn adapter(&self, provider: Provider) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider)
    }

    /// Generate a response, falling back across candidates as needed.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        self.generate_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`generate`](Self::generate), aborting promptly with
    /// [`GenerationError::Cancelled`] once `cancel` fires.
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(provider = %request.config.provider, model = %request.config.model)
    )]
    pub async fn generate_with_cancel(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let start = Instant::now();
        let requested = request.config.candidate();

        let result = async {
            self.validate_text_request(request)?;
            self.check_credits(request.caller.as_deref(), &requested)
                .await?;
            let candidates = self.planner.plan(&requested);
            tracing::debug!(candidates = ?candidates, "Planned candidates");
            self.with_deadline(self.run_candidates(request, &candidates, cancel))
                .await
        }
        .await;

        record_outcome(&requested, &result, start);
        result
    }

    async fn run_candidates(
        &self,
        request: &GenerationRequest,
        candidates: &[Candidate],
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let mut last_error: Option<GenerationError> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            let Some(adapter) = self.adapters.get(&candidate.provider) else {
                continue;
            };
            if index > 0 {
                metrics::counter!("generation.fallbacks").increment(1);
                tracing::info!(candidate = %candidate, "Falling back to next candidate");
            }

            let adapter = adapter.as_ref();
            let config = request.config.for_candidate(candidate);
            let config = &config;
            let messages = request.messages.as_slice();
            let res = self
                .executor
                .execute(candidate, cancel, move |_| {
                    adapter.generate_text(messages, config)
                })
                .await;

            match res {
                Ok(completion) => {
                    return Ok(GenerationResult::from_completion(
                        completion,
                        candidate.clone(),
                    ));
                }
                Err(e) if e.triggers_fallback() => {
                    tracing::warn!(
                        provider = %candidate.provider,
                        model = %candidate.model,
                        classification = ?e.classification(),
                        rate_limited = e.is_rate_limited(),
                        error = %e,
                        "Candidate failed"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(exhausted(last_error))
    }

    /// Generate images with the requested model. There is no fallback chain;
    /// retries still apply.
    pub async fn generate_image(
        &self,
        request: &ImageGenerationRequest,
    ) -> Result<ImageGenerationResponse> {
        self.generate_image_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`generate_image`](Self::generate_image), aborting the upstream
    /// call or backoff sleep once `cancel` fires.
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(provider = %request.config.provider, model = %request.config.model)
    )]
    pub async fn generate_image_with_cancel(
        &self,
        request: &ImageGenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<ImageGenerationResponse> {
        let start = Instant::now();
        let candidate = request.config.candidate();

        let result = async {
            let adapter = self.validate_image_request(request)?;
            self.check_credits(request.caller.as_deref(), &candidate)
                .await?;

            let adapter = adapter.as_ref();
            let prompt = request.prompt.as_str();
            let config = &request.config;
            let options = &request.options;
            let res = self
                .with_deadline(self.executor.execute(&candidate, cancel, move |_| {
                    adapter.generate_image(prompt, config, options)
                }))
                .await;

            match res {
                Ok(images) => Ok(ImageGenerationResponse {
                    images,
                    served_by: candidate.clone(),
                }),
                Err(e) if e.triggers_fallback() => {
                    tracing::warn!(
                        candidate = %candidate,
                        error = %e,
                        "Image generation failed"
                    );
                    Err(exhausted(Some(e)))
                }
                Err(e) => Err(e),
            }
        }
        .await;

        record_outcome(&candidate, &result, start);
        result
    }

    /// Run `processor` on a detached task. Failures are logged and never reach
    /// the caller.
    pub fn spawn_post_processing(
        &self,
        processor: Arc<dyn PostProcessor>,
        snapshot: ConversationSnapshot,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let conversation_id = snapshot.conversation_id.clone();
            match processor.process(snapshot).await {
                Ok(()) => tracing::debug!(
                    processor = processor.name(),
                    conversation_id = %conversation_id,
                    "Post-processing finished"
                ),
                Err(e) => tracing::error!(
                    processor = processor.name(),
                    conversation_id = %conversation_id,
                    error = %e,
                    "Post-processing failed"
                ),
            }
        })
    }

    /// Checks shared by plain and streamed text generation. Never touches the
    /// network.
    pub(crate) fn validate_text_request(&self, request: &GenerationRequest) -> Result<()> {
        if request.messages.is_empty() {
            return Err(GenerationError::Validation(
                "Request contains no messages".to_string(),
            ));
        }
        let info = self.lookup_model(&request.config.candidate())?;
        if info.modality != Modality::Text {
            return Err(GenerationError::Validation(format!(
                "Model '{}' does not generate text",
                request.config.model
            )));
        }
        if let Some(attachment) = request
            .messages
            .iter()
            .flat_map(|m| m.attachments.iter())
            .find(|a| !a.is_image())
        {
            return Err(GenerationError::Validation(format!(
                "Unsupported attachment type '{}'; only images are accepted",
                attachment.mime_type
            )));
        }

        let adapter = self.require_adapter(request.config.provider)?;
        if !adapter.capabilities().text {
            return Err(GenerationError::Capability(format!(
                "{} adapter does not support text generation",
                request.config.provider
            )));
        }
        Ok(())
    }

    fn validate_image_request(
        &self,
        request: &ImageGenerationRequest,
    ) -> Result<&Arc<dyn ProviderAdapter>> {
        if request.prompt.trim().is_empty() {
            return Err(GenerationError::Validation(
                "Image prompt is empty".to_string(),
            ));
        }
        let info = self.lookup_model(&request.config.candidate())?;
        if info.modality != Modality::Image {
            return Err(GenerationError::Validation(format!(
                "Model '{}' does not generate images",
                request.config.model
            )));
        }
        let n = request.options.n();
        if n == 0 || n > ImageOptions::MAX_IMAGES {
            return Err(GenerationError::Validation(format!(
                "Image count must be between 1 and {}",
                ImageOptions::MAX_IMAGES
            )));
        }

        let adapter = self.require_adapter(request.config.provider)?;
        if !adapter.capabilities().image {
            return Err(GenerationError::Capability(format!(
                "{} adapter does not support image generation",
                request.config.provider
            )));
        }
        Ok(adapter)
    }

    fn lookup_model(&self, candidate: &Candidate) -> Result<&ModelInfo> {
        self.catalog
            .get(candidate.provider, &candidate.model)
            .ok_or_else(|| {
                GenerationError::Validation(format!(
                    "Unknown model '{}' for provider '{}'",
                    candidate.model, candidate.provider
                ))
            })
    }

    pub(crate) fn require_adapter(&self, provider: Provider) -> Result<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).ok_or_else(|| {
            GenerationError::Capability(format!("No adapter registered for provider '{}'", provider))
        })
    }

    pub(crate) async fn check_credits(
        &self,
        caller: Option<&str>,
        candidate: &Candidate,
    ) -> Result<()> {
        let Some(credit_check) = &self.credit_check else {
            return Ok(());
        };
        let caller = caller.ok_or_else(|| {
            GenerationError::Validation("Caller identity is required".to_string())
        })?;
        let required = self
            .catalog
            .cost_credits(candidate.provider, &candidate.model);
        if credit_check.can_afford(caller, required).await? {
            Ok(())
        } else {
            tracing::info!(
                caller = %caller,
                candidate = %candidate,
                required,
                "Insufficient credits"
            );
            Err(GenerationError::InsufficientCredits { required })
        }
    }

    pub(crate) async fn with_deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
                tracing::error!(
                    timeout_secs = timeout.as_secs_f64(),
                    "Request deadline exceeded"
                );
                Err(GenerationError::Timeout)
            }),
            None => fut.await,
        }
    }
}

/// Aggregate error once every candidate has failed.
pub(crate) fn exhausted(last_error: Option<GenerationError>) -> GenerationError {
    let last_error = last_error.unwrap_or_else(|| {
        GenerationError::Capability("No available provider for this request".to_string())
    });
    GenerationError::AllCandidatesExhausted {
        rate_limited: last_error.is_rate_limited(),
        last_error: Box::new(last_error),
    }
}

pub(crate) fn record_outcome<T>(requested: &Candidate, result: &Result<T>, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    metrics::histogram!(
        "generation.duration_seconds",
        "provider" => requested.provider.as_str()
    )
    .record(duration);

    let status = match result {
        Ok(_) => "success",
        Err(GenerationError::Cancelled) => "cancelled",
        Err(_) => "failure",
    };
    metrics::counter!(
        "generation.total",
        "provider" => requested.provider.as_str(),
        "status" => status
    )
    .increment(1);
}

/// Builder for an [`Orchestrator`].
///
/// ```rust,no_run
/// # use llm_relay::orchestrator::Orchestrator;
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Orchestrator::builder()
///     // .register_adapter(...)
///     // .catalog(...)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct OrchestratorBuilder {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    catalog: Option<ModelCatalog>,
    retry: RetryPolicy,
    fallbacks: Vec<Candidate>,
    credit_check: Option<Arc<dyn CreditCheck>>,
    request_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            adapters: HashMap::new(),
            catalog: None,
            retry: RetryPolicy::default(),
            fallbacks: default_fallbacks(),
            credit_check: None,
            request_timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            call_timeout: None,
        }
    }
}

impl OrchestratorBuilder {
    /// Register an adapter, keyed by its
    /// [`provider`](crate::traits::ProviderAdapter::provider); registering a
    /// second adapter for the same provider replaces the first.
    pub fn register_adapter<A: ProviderAdapter + 'static>(self, adapter: A) -> Self {
        self.register_shared(Arc::new(adapter))
    }

    /// Register an adapter that is already shared.
    pub fn register_shared(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    /// Set the model catalog. Defaults to the built-in models of the
    /// registered providers.
    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Apply retry policy, fallbacks, and timeouts from `config`.
    pub fn config(mut self, config: &RelayConfig) -> Self {
        self.retry = config.retry.clone();
        self.fallbacks = config.fallbacks.clone();
        self.request_timeout = config.request_timeout();
        self.call_timeout = config.call_timeout();
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn fallbacks(mut self, fallbacks: Vec<Candidate>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn credit_check<C: CreditCheck + 'static>(mut self, check: C) -> Self {
        self.credit_check = Some(Arc::new(check));
        self
    }

    /// Overall deadline for one request; `None` disables it.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Deadline for one upstream call; exceeding it counts as a transient
    /// failure.
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Validate fallbacks against the catalog and construct the orchestrator.
    pub fn build(self) -> Result<Arc<Orchestrator>> {
        if self.retry.max_attempts == 0 {
            return Err(GenerationError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.request_timeout == Some(Duration::ZERO) {
            return Err(GenerationError::Config(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        if self.call_timeout == Some(Duration::ZERO) {
            return Err(GenerationError::Config(
                "Call timeout must be greater than 0".to_string(),
            ));
        }

        let registered: BTreeSet<Provider> = self.adapters.keys().copied().collect();
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => ModelCatalog::builtin().restrict_to(&registered),
        };

        let planner = FallbackPlanner::new(&catalog, self.fallbacks).restrict_to(&registered);
        planner.validate(&catalog)?;

        tracing::info!(
            providers = ?registered,
            fallbacks = planner.fallbacks().len(),
            "Orchestrator built"
        );

        Ok(Arc::new(Orchestrator {
            adapters: self.adapters,
            catalog: Arc::new(catalog),
            planner,
            executor: RetryExecutor::new(self.retry).with_call_timeout(self.call_timeout),
            credit_check: self.credit_check,
            request_timeout: self.request_timeout,
        }))
    }
}
