//! Scripted collaborators for driving the pipeline without a network.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use repodiagram::gateway::{ProviderError, TextGenerator, TextRequest, TextStream};
use repodiagram::pipeline::{DiagramPipeline, PipelineConfig, PipelineEvent};
use repodiagram::source::{RepositorySnapshot, RepositorySource, SourceError};
use repodiagram::validator::{DiagramValidator, ValidationResult};

pub fn snapshot() -> RepositorySnapshot {
    RepositorySnapshot {
        default_branch: "main".into(),
        file_tree: "src/main.py\nsrc/api/routes.py\nREADME.md".into(),
        readme: "# demo\nA tiny web service.".into(),
    }
}

// =============================================================================
// Source
// =============================================================================

pub enum FakeSource {
    Snapshot(RepositorySnapshot),
    NotFound,
}

#[async_trait]
impl RepositorySource for FakeSource {
    async fn fetch(
        &self,
        _owner: &str,
        _repo: &str,
        _credential: Option<&str>,
    ) -> Result<RepositorySnapshot, SourceError> {
        match self {
            FakeSource::Snapshot(s) => Ok(s.clone()),
            FakeSource::NotFound => Err(SourceError::NotFound("Repository not found.".into())),
        }
    }
}

// =============================================================================
// Generator
// =============================================================================

/// One scripted generation call.
pub enum Script {
    /// Yield these increments, then end.
    Chunks(Vec<&'static str>),
    /// Yield these increments, then fail with a stream error.
    FailAfter(Vec<&'static str>, &'static str),
    /// Yield these increments, then never finish. Sets the flag when dropped.
    HangAfter(Vec<&'static str>, Arc<AtomicBool>),
    /// Fail to open the stream at all.
    OpenError(&'static str),
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Replays scripts in call order and records every request it sees.
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Script>>,
    token_count: Option<u64>,
    pub requests: Mutex<Vec<TextRequest>>,
}

impl ScriptedGenerator {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            token_count: Some(1_000),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `None` makes the token count call fail.
    pub fn with_token_count(mut self, count: Option<u64>) -> Self {
        self.token_count = count;
        self
    }

    pub fn callers(&self) -> Vec<&'static str> {
        self.requests.lock().unwrap().iter().map(|r| r.caller).collect()
    }
}

fn ok_chunks(chunks: Vec<&'static str>) -> Vec<Result<String, ProviderError>> {
    chunks.into_iter().map(|c| Ok(c.to_string())).collect()
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn stream_text(&self, req: TextRequest) -> Result<TextStream, ProviderError> {
        self.requests.lock().unwrap().push(req);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Chunks(vec![]));

        Ok(match script {
            Script::Chunks(chunks) => stream::iter(ok_chunks(chunks)).boxed(),
            Script::FailAfter(chunks, message) => {
                let mut items = ok_chunks(chunks);
                items.push(Err(ProviderError::stream(message)));
                stream::iter(items).boxed()
            }
            Script::HangAfter(chunks, flag) => {
                let guard = DropFlag(flag);
                stream::iter(ok_chunks(chunks))
                    .chain(stream::pending())
                    .map(move |item| {
                        let _guard = &guard;
                        item
                    })
                    .boxed()
            }
            Script::OpenError(message) => {
                return Err(ProviderError::provider("openai", message));
            }
        })
    }

    async fn count_input_tokens(&self, _req: &TextRequest) -> Result<u64, ProviderError> {
        self.token_count
            .ok_or_else(|| ProviderError::config("no token counter"))
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Returns scripted results in order; valid once the script runs out.
pub struct ScriptedValidator {
    results: Mutex<VecDeque<ValidationResult>>,
    pub seen: Mutex<Vec<String>>,
    panic_on_check: bool,
}

impl ScriptedValidator {
    pub fn new(results: Vec<ValidationResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            seen: Mutex::new(Vec::new()),
            panic_on_check: false,
        }
    }

    pub fn always_valid() -> Self {
        Self::new(vec![])
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_check: true,
            ..Self::new(vec![])
        }
    }
}

#[async_trait]
impl DiagramValidator for ScriptedValidator {
    async fn check(&self, diagram: &str) -> ValidationResult {
        if self.panic_on_check {
            panic!("validator exploded");
        }
        self.seen.lock().unwrap().push(diagram.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ValidationResult::valid)
    }
}

pub fn parse_error(message: &str, line: u32) -> ValidationResult {
    ValidationResult {
        valid: false,
        message: Some(message.to_string()),
        line: Some(line),
        token: None,
        expected: None,
    }
}

// =============================================================================
// Pipeline helpers
// =============================================================================

pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        pacing_delay: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

pub fn build_pipeline(
    source: FakeSource,
    generator: Arc<ScriptedGenerator>,
    validator: Arc<ScriptedValidator>,
) -> Arc<DiagramPipeline> {
    Arc::new(
        DiagramPipeline::new(Arc::new(source), generator, validator).with_config(fast_config()),
    )
}

/// The three stage scripts of a run that draws `diagram`.
pub fn stage_scripts(diagram: &'static str) -> Vec<Script> {
    vec![
        Script::Chunks(vec!["The service ", "exposes an API."]),
        Script::Chunks(vec![
            "<component_mapping>\n1. API: src/api/\n",
            "</component_mapping>",
        ]),
        Script::Chunks(vec!["```mermaid\n", diagram, "\n```"]),
    ]
}

pub fn statuses(events: &[PipelineEvent]) -> Vec<&'static str> {
    events.iter().map(PipelineEvent::status).collect()
}
