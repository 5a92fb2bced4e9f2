//! Process configuration gathered from the environment.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::gateway::{openai, OpenAiAdapter, ProviderError, DEFAULT_MODEL};
use crate::pipeline::{DiagramPipeline, PipelineConfig, DEFAULT_PACING_DELAY};
use crate::source::{github, GitHubSource, SourceError};
use crate::validator::{self, CommandValidator};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("source setup failed: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub openai_api_key: Option<String>,
    pub model: String,
    pub openai_base_url: String,
    pub openai_timeout: Duration,
    pub github_pat: Option<String>,
    pub github_api_url: String,
    pub validator_program: String,
    pub validator_args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub pacing_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            openai_base_url: openai::DEFAULT_BASE_URL.to_string(),
            openai_timeout: openai::DEFAULT_TIMEOUT,
            github_pat: None,
            github_api_url: github::DEFAULT_API_URL.to_string(),
            validator_program: validator::DEFAULT_PROGRAM.to_string(),
            validator_args: vec![validator::DEFAULT_SCRIPT.to_string()],
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            pacing_delay: DEFAULT_PACING_DELAY,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.openai_api_key = get("OPENAI_API_KEY");
        if let Some(model) = get("OPENAI_MODEL") {
            config.model = model.trim().to_string();
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.openai_base_url = url;
        }
        if let Some(secs) = get("OPENAI_TIMEOUT_SECONDS") {
            config.openai_timeout = Duration::from_secs(parse("OPENAI_TIMEOUT_SECONDS", secs)?);
        }
        config.github_pat = get("GITHUB_PAT");
        if let Some(url) = get("GITHUB_API_URL") {
            config.github_api_url = url;
        }
        if let Some(program) = get("MERMAID_VALIDATOR_PROGRAM") {
            config.validator_program = program;
        }
        if let Some(args) = get("MERMAID_VALIDATOR_ARGS") {
            config.validator_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = parse("PORT", port)?;
        }
        if let Some(ms) = get("PACING_DELAY_MS") {
            config.pacing_delay = Duration::from_millis(parse("PACING_DELAY_MS", ms)?);
        }
        Ok(config)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            model: self.model.clone(),
            pacing_delay: self.pacing_delay,
            ..PipelineConfig::default()
        }
    }

    /// Wire the production adapters into a pipeline.
    pub fn build_pipeline(&self) -> Result<DiagramPipeline, ConfigError> {
        let source = GitHubSource::with_config(
            self.github_pat.clone(),
            &self.github_api_url,
            github::DEFAULT_TIMEOUT,
        )?;
        let generator = OpenAiAdapter::with_config(
            self.openai_api_key.clone(),
            &self.openai_base_url,
            self.openai_timeout,
        )?;
        let validator =
            CommandValidator::new(self.validator_program.clone(), self.validator_args.clone());

        Ok(
            DiagramPipeline::new(Arc::new(source), Arc::new(generator), Arc::new(validator))
                .with_config(self.pipeline_config()),
        )
    }
}
