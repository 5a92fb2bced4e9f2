//! Staged diagram generation.
//!
//! A run walks a fixed chain:
//! 1. **Fetch** the repository snapshot
//! 2. **Gate** the stage-1 input against the token budget
//! 3. **Explain**, **map** and **draw** in three streamed stages
//! 4. **Repair** the drawing until the validator accepts it (bounded)
//! 5. **Link** `click` directives to GitHub
//!
//! Every step is reported through [`events::EventEmitter`]; a run always ends
//! with exactly one terminal event unless the consumer hung up first.

pub mod cost;
pub mod error;
pub mod events;
pub mod links;
pub mod repair;
pub mod stages;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream};
use futures::FutureExt;
use serde::Deserialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::gate::{GateDecision, TokenGate};
use crate::gateway::{PromptSection, TextGenerator, DEFAULT_MODEL};
use crate::source::RepositorySource;
use crate::validator::DiagramValidator;

pub use cost::CostEstimate;
pub use error::GenerationError;
pub use events::{ErrorCode, EventEmitter, PipelineEvent};
pub use links::process_click_events;
pub use stages::{extract_component_mapping, strip_mermaid_code_fences, Stage};

use error::STREAM_FAILED_MESSAGE;
use repair::{RepairContext, MAX_FIX_ATTEMPTS};
use stages::StageRunner;

/// Pause between a stage's `_sent` and progress events.
pub const DEFAULT_PACING_DELAY: Duration = Duration::from_millis(80);

// =============================================================================
// Request
// =============================================================================

/// Body of `/generate/stream` and `/generate/cost`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GenerationRequest {
    /// Repository owner.
    pub username: String,
    pub repo: String,
    /// Caller's OpenAI key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Caller's GitHub token.
    #[serde(default)]
    pub github_pat: Option<String>,
}

impl GenerationRequest {
    pub fn new(username: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            repo: repo.into(),
            api_key: None,
            github_pat: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_github_pat(mut self, pat: impl Into<String>) -> Self {
        self.github_pat = Some(pat.into());
        self
    }

    /// Owner and repo are required; credentials, when given, must be non-empty.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.username.is_empty() {
            return Err(GenerationError::request_validation("username is empty"));
        }
        if self.repo.is_empty() {
            return Err(GenerationError::request_validation("repo is empty"));
        }
        if self.api_key.as_deref() == Some("") {
            return Err(GenerationError::request_validation("api_key is empty"));
        }
        if self.github_pat.as_deref() == Some("") {
            return Err(GenerationError::request_validation("github_pat is empty"));
        }
        Ok(())
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model: String,
    pub pacing_delay: Duration,
    pub max_fix_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            pacing_delay: DEFAULT_PACING_DELAY,
            max_fix_attempts: MAX_FIX_ATTEMPTS,
        }
    }
}

/// Orchestrates one run per request. Holds no per-run state.
pub struct DiagramPipeline {
    source: Arc<dyn RepositorySource>,
    generator: Arc<dyn TextGenerator>,
    validator: Arc<dyn DiagramValidator>,
    gate: TokenGate,
    config: PipelineConfig,
}

impl DiagramPipeline {
    pub fn new(
        source: Arc<dyn RepositorySource>,
        generator: Arc<dyn TextGenerator>,
        validator: Arc<dyn DiagramValidator>,
    ) -> Self {
        Self {
            source,
            generator,
            validator,
            gate: TokenGate::default(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_gate(mut self, gate: TokenGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Quote the run without starting it.
    pub async fn estimate_cost(
        &self,
        req: &GenerationRequest,
    ) -> Result<CostEstimate, GenerationError> {
        req.validate()?;
        let snapshot = self
            .source
            .fetch(&req.username, &req.repo, req.github_pat.as_deref())
            .await?;
        let base = self
            .gate
            .estimate_input_tokens(
                self.generator.as_ref(),
                &self.config.model,
                &snapshot,
                req.api_key.as_deref(),
            )
            .await;
        Ok(CostEstimate::from_base_tokens(&self.config.model, base))
    }

    /// Run to completion, emitting exactly one terminal event.
    ///
    /// Failures and panics inside the run are reported through `emitter`;
    /// this never fails itself.
    pub async fn execute(&self, req: GenerationRequest, mut emitter: EventEmitter) {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "generation",
            %run_id,
            owner = %req.username,
            repo = %req.repo,
            model = %self.config.model,
        );

        async move {
            let started = Instant::now();
            let outcome = AssertUnwindSafe(self.run(&req, &mut emitter))
                .catch_unwind()
                .await;

            let terminal = match outcome {
                Ok(Ok(complete)) => Some(complete),
                Ok(Err(err)) => {
                    warn!(
                        error = %err,
                        code = err.error_code().as_str(),
                        "generation failed"
                    );
                    err.into_event()
                }
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    error!(panic = %detail, "generation panicked");
                    Some(PipelineEvent::Error {
                        error: STREAM_FAILED_MESSAGE.to_string(),
                        error_code: ErrorCode::StreamFailed,
                        parser_error: None,
                    })
                }
            };

            if let Some(event) = terminal {
                if !emitter.is_terminated() {
                    let status = event.status();
                    if let Err(e) = emitter.emit(event).await {
                        debug!(error = %e, "terminal event not delivered");
                    } else {
                        info!(
                            status,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "run finished"
                        );
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Start a run in the background and return its events.
    ///
    /// Dropping the returned stream cancels the run: in-flight provider
    /// responses and validator processes are released with it.
    pub fn event_stream(
        self: &Arc<Self>,
        req: GenerationRequest,
    ) -> BoxStream<'static, PipelineEvent> {
        let (emitter, rx) = events::channel(events::EVENT_BUFFER);
        let watcher = emitter.sender();
        let pipeline = Arc::clone(self);

        tokio::spawn(async move {
            tokio::select! {
                _ = pipeline.execute(req, emitter) => {}
                _ = watcher.closed() => {
                    debug!("event consumer went away, cancelling run");
                }
            }
        });

        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        }))
    }

    async fn run(
        &self,
        req: &GenerationRequest,
        emitter: &mut EventEmitter,
    ) -> Result<PipelineEvent, GenerationError> {
        let snapshot = self
            .source
            .fetch(&req.username, &req.repo, req.github_pat.as_deref())
            .await?;

        let estimate = self
            .gate
            .estimate_input_tokens(
                self.generator.as_ref(),
                &self.config.model,
                &snapshot,
                req.api_key.as_deref(),
            )
            .await;

        emitter
            .emit(PipelineEvent::Started {
                message: "Starting generation process...".into(),
            })
            .await?;

        if let GateDecision::Reject(rejection) = self.gate.decide(estimate, req.api_key.is_some()) {
            info!(estimate, ?rejection, "token gate rejected run");
            return Err(GenerationError::Budget(rejection));
        }
        debug!(estimate, "token gate passed");

        let runner = StageRunner {
            generator: self.generator.as_ref(),
            model: &self.config.model,
            api_key: req.api_key.as_deref(),
            pacing_delay: self.config.pacing_delay,
        };

        let explanation = runner
            .run(
                Stage::Explanation,
                vec![
                    PromptSection::new("file_tree", snapshot.file_tree.clone()),
                    PromptSection::new("readme", snapshot.readme.clone()),
                ],
                emitter,
            )
            .await?;

        let raw_mapping = runner
            .run(
                Stage::Mapping,
                vec![
                    PromptSection::new("explanation", explanation.clone()),
                    PromptSection::new("file_tree", snapshot.file_tree.clone()),
                ],
                emitter,
            )
            .await?;
        let mapping = extract_component_mapping(&raw_mapping);

        let raw_diagram = runner
            .run(
                Stage::Diagram,
                vec![
                    PromptSection::new("explanation", explanation.clone()),
                    PromptSection::new("component_mapping", mapping.clone()),
                ],
                emitter,
            )
            .await?;

        let repair_ctx = RepairContext {
            validator: self.validator.as_ref(),
            explanation: &explanation,
            mapping: &mapping,
            max_attempts: self.config.max_fix_attempts,
        };
        let diagram = repair::ensure_valid(
            &runner,
            &repair_ctx,
            strip_mermaid_code_fences(&raw_diagram),
            emitter,
        )
        .await?;

        let diagram = process_click_events(
            &diagram,
            &req.username,
            &req.repo,
            &snapshot.default_branch,
        );

        Ok(PipelineEvent::Complete {
            diagram,
            explanation,
            mapping,
        })
    }
}
