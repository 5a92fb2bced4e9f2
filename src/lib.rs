#![forbid(unsafe_code)]

//! # repodiagram
//!
//! Turns a GitHub repository into a validated Mermaid architecture diagram.
//!
//! A run chains three streamed model calls (explain the repository, map
//! components to paths, draw the diagram), checks the drawing with an
//! external Mermaid parser and feeds parser errors back to the model for a
//! bounded number of repairs. Every increment is pushed to the caller as a
//! [`pipeline::PipelineEvent`] so the diagram can be watched while it is
//! being written.
//!
//! A token gate runs before any generation: small repositories are free,
//! mid-sized ones need the caller's own OpenAI key, and very large ones are
//! refused outright.

pub mod config;
pub mod gate;
pub mod gateway;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod source;
pub mod telemetry;
pub mod validator;

pub use config::{AppConfig, ConfigError};
pub use gate::{GateDecision, GatePolicy, GateRejection, TokenGate};
pub use gateway::{OpenAiAdapter, ProviderError, TextGenerator, TextRequest, TextStream};
pub use pipeline::{
    CostEstimate, DiagramPipeline, ErrorCode, GenerationError, GenerationRequest, PipelineConfig,
    PipelineEvent,
};
pub use source::{GitHubSource, RepositorySnapshot, RepositorySource, SourceError};
pub use validator::{CommandValidator, DiagramValidator, ValidationResult};
