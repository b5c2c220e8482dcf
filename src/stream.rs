//! Incremental delivery of a generation to a single consumer.
//!
//! [`StreamEmitter::start`] spawns a producer task and returns a
//! [`StreamSession`] that yields [`StreamEvent`]s in order. The producer
//! writes into a bounded channel; the session is the only reader.

use crate::api::{Candidate, FinishReason, GenerationRequest};
use crate::error::{GenerationError, Result};
use crate::orchestrator::{Orchestrator, exhausted, record_outcome};
use crate::traits::{TextDelta, TextStream};
use futures::StreamExt;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_BUFFER: usize = 32;

/// How text is produced for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Provider-native streaming.
    #[default]
    Native,
    /// Generate the full response, then replay it in small increments.
    Synthesized {
        granularity: Granularity,
        base_delay: Duration,
        jitter: Duration,
    },
}

impl StreamMode {
    /// Word-by-word replay with a short randomised pause.
    pub fn synthesized_words() -> Self {
        Self::Synthesized {
            granularity: Granularity::Word,
            base_delay: Duration::from_millis(20),
            jitter: Duration::from_millis(30),
        }
    }
}

/// Unit of a synthesized delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Word,
    Char,
}

/// One event of a session. After a terminal event (`Completed`, `Cancelled`,
/// `Failed`) nothing else is delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Completed {
        served_by: Candidate,
        finish_reason: Option<FinishReason>,
    },
    Cancelled,
    Failed(GenerationError),
}

/// Lifecycle of a [`StreamSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Pending,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// What a session delivered, for persisting a possibly truncated response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResult {
    pub content: String,
    /// `true` unless the session completed normally.
    pub truncated: bool,
    pub served_by: Option<Candidate>,
}

/// Starts stream sessions against a shared [`Orchestrator`].
#[derive(Clone)]
pub struct StreamEmitter {
    orchestrator: Arc<Orchestrator>,
    mode: StreamMode,
    buffer: usize,
}

impl StreamEmitter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            mode: StreamMode::default(),
            buffer: DEFAULT_BUFFER,
        }
    }

    pub fn with_mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }

    /// Channel capacity between producer and consumer.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Spawn the producer for `request` and return its session.
    pub fn start(&self, request: GenerationRequest) -> StreamSession {
        let (tx, rx) = mpsc::channel(self.buffer);
        let cancel = CancellationToken::new();
        let producer = Producer {
            orchestrator: self.orchestrator.clone(),
            tx,
            cancel: cancel.clone(),
        };
        let mode = self.mode;
        let task = tokio::spawn(async move { producer.run(request, mode).await });

        StreamSession {
            rx,
            cancel,
            content: String::new(),
            state: StreamState::Pending,
            served_by: None,
            _task: task,
        }
    }
}

/// Consumer side of one streamed generation.
///
/// Dropping the session cancels the producer.
pub struct StreamSession {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    content: String,
    state: StreamState,
    served_by: Option<Candidate>,
    _task: JoinHandle<()>,
}

impl StreamSession {
    /// Next event, or `None` once a terminal event has been returned.
    ///
    /// After [`cancel`](Self::cancel) the next call returns
    /// [`StreamEvent::Cancelled`]; buffered deltas are discarded.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.state.is_terminal() {
            return None;
        }

        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => StreamEvent::Cancelled,
            event = self.rx.recv() => match event {
                Some(event) => event,
                None => {
                    // Producer ended without a terminal event.
                    self.state = StreamState::Failed;
                    return None;
                }
            },
        };

        match &event {
            StreamEvent::Delta(text) => {
                self.content.push_str(text);
                self.state = StreamState::Streaming;
            }
            StreamEvent::Completed { served_by, .. } => {
                self.served_by = Some(served_by.clone());
                self.state = StreamState::Completed;
            }
            StreamEvent::Cancelled => self.state = StreamState::Cancelled,
            StreamEvent::Failed(_) => self.state = StreamState::Failed,
        }
        Some(event)
    }

    /// Stop the producer. Takes effect at the next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this session from elsewhere.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Text of every delta returned by [`next_event`](Self::next_event).
    pub fn accumulated_content(&self) -> &str {
        &self.content
    }

    pub fn served_by(&self) -> Option<&Candidate> {
        self.served_by.as_ref()
    }

    pub fn into_partial(mut self) -> PartialResult {
        PartialResult {
            content: std::mem::take(&mut self.content),
            truncated: self.state != StreamState::Completed,
            served_by: self.served_by.take(),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Producer side: runs on its own task and ends after sending one terminal
/// event.
struct Producer {
    orchestrator: Arc<Orchestrator>,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl Producer {
    #[tracing::instrument(
        skip(self, request),
        fields(provider = %request.config.provider, model = %request.config.model)
    )]
    async fn run(self, request: GenerationRequest, mode: StreamMode) {
        let result = match mode {
            StreamMode::Native => self.run_native(&request).await,
            StreamMode::Synthesized {
                granularity,
                base_delay,
                jitter,
            } => {
                self.run_synthesized(&request, granularity, base_delay, jitter)
                    .await
            }
        };

        let terminal = match result {
            Ok(()) => return,
            Err(GenerationError::Cancelled) => StreamEvent::Cancelled,
            Err(e) => {
                tracing::warn!(error = %e, "Stream failed");
                StreamEvent::Failed(e)
            }
        };
        // The consumer may already be gone.
        let _ = self.tx.send(terminal).await;
    }

    /// Send an event unless cancelled first.
    async fn emit(&self, event: StreamEvent) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GenerationError::Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| GenerationError::Cancelled),
        }
    }

    async fn run_native(&self, request: &GenerationRequest) -> Result<()> {
        let orch = &self.orchestrator;
        let requested = request.config.candidate();
        let start = Instant::now();

        let opened = async {
            orch.validate_text_request(request)?;
            if !orch.require_adapter(requested.provider)?.capabilities().streaming {
                return Err(GenerationError::Capability(format!(
                    "{} adapter does not support streaming",
                    requested.provider
                )));
            }
            orch.check_credits(request.caller.as_deref(), &requested)
                .await?;
            orch.with_deadline(self.open_first_candidate(request)).await
        }
        .await;

        let (served_by, first, stream) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                record_outcome(&requested, &Err::<(), _>(e.clone()), start);
                return Err(e);
            }
        };

        let res = self.pump(served_by, first, stream).await;
        record_outcome(&requested, &res, start);
        res
    }

    /// Try candidates in plan order until one yields its first delta. Opening
    /// the stream and reading that delta are retried together.
    async fn open_first_candidate(
        &self,
        request: &GenerationRequest,
    ) -> Result<(Candidate, Option<TextDelta>, TextStream)> {
        let orch = &self.orchestrator;
        let candidates = orch.planner().plan(&request.config.candidate());
        let mut last_error: Option<GenerationError> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            let Some(adapter) = orch.adapter(candidate.provider) else {
                continue;
            };
            if !adapter.capabilities().streaming {
                tracing::debug!(candidate = %candidate, "Skipping candidate without streaming");
                continue;
            }
            if index > 0 {
                metrics::counter!("generation.fallbacks").increment(1);
                tracing::info!(candidate = %candidate, "Falling back to next candidate");
            }

            let adapter = adapter.as_ref();
            let config = request.config.for_candidate(candidate);
            let config = &config;
            let messages = request.messages.as_slice();
            let res = orch
                .executor()
                .execute(candidate, &self.cancel, move |_| async move {
                    let mut stream = adapter.stream_text(messages, config).await?;
                    match stream.next().await {
                        Some(Err(e)) => Err(e),
                        Some(Ok(first)) => Ok((Some(first), stream)),
                        None => Ok((None, stream)),
                    }
                })
                .await;

            match res {
                Ok((first, stream)) => return Ok((candidate.clone(), first, stream)),
                Err(e) if e.triggers_fallback() => {
                    tracing::warn!(
                        provider = %candidate.provider,
                        model = %candidate.model,
                        classification = ?e.classification(),
                        rate_limited = e.is_rate_limited(),
                        error = %e,
                        "Candidate failed to start streaming"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(exhausted(last_error))
    }

    /// Forward a committed stream. No fallback from here on.
    async fn pump(
        &self,
        served_by: Candidate,
        first: Option<TextDelta>,
        mut stream: TextStream,
    ) -> Result<()> {
        let mut finish_reason = None;
        let mut next = first;

        loop {
            match next {
                Some(TextDelta::Text(text)) => self.emit(StreamEvent::Delta(text)).await?,
                Some(TextDelta::Finished(reason)) => finish_reason = Some(reason),
                None => break,
            }
            next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(GenerationError::Cancelled),
                item = stream.next() => item.transpose()?,
            };
        }

        tracing::debug!(served_by = %served_by, "Stream completed");
        self.emit(StreamEvent::Completed {
            served_by,
            finish_reason,
        })
        .await
    }

    async fn run_synthesized(
        &self,
        request: &GenerationRequest,
        granularity: Granularity,
        base_delay: Duration,
        jitter: Duration,
    ) -> Result<()> {
        let result = self
            .orchestrator
            .generate_with_cancel(request, &self.cancel)
            .await?;

        for chunk in split_chunks(&result.content, granularity) {
            let pause = base_delay + random_jitter(jitter);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(GenerationError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
            self.emit(StreamEvent::Delta(chunk.to_string())).await?;
        }

        self.emit(StreamEvent::Completed {
            served_by: result.served_by,
            finish_reason: result.finish_reason,
        })
        .await
    }
}

fn random_jitter(jitter: Duration) -> Duration {
    let max = jitter.as_millis() as u64;
    if max == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max))
}

/// Split `text` into replay increments. Words keep their trailing
/// whitespace so the chunks concatenate back to `text`.
fn split_chunks(text: &str, granularity: Granularity) -> Vec<&str> {
    match granularity {
        Granularity::Word => text.split_inclusive(char::is_whitespace).collect(),
        Granularity::Char => text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect(),
    }
}
