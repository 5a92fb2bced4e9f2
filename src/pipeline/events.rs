//! Progress events pushed to the caller while a run is in flight.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Machine-readable error codes carried by terminal `error` events and
/// `ok: false` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    ApiKeyRequired,
    TokenLimitExceeded,
    MermaidSyntaxUnresolved,
    StreamFailed,
    CostEstimationFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ApiKeyRequired => "API_KEY_REQUIRED",
            ErrorCode::TokenLimitExceeded => "TOKEN_LIMIT_EXCEEDED",
            ErrorCode::MermaidSyntaxUnresolved => "MERMAID_SYNTAX_UNRESOLVED",
            ErrorCode::StreamFailed => "STREAM_FAILED",
            ErrorCode::CostEstimationFailed => "COST_ESTIMATION_FAILED",
        }
    }
}

/// One frame of the push stream. The `status` field discriminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started {
        message: String,
    },

    ExplanationSent {
        message: String,
    },
    Explanation {
        message: String,
    },
    ExplanationChunk {
        chunk: String,
    },

    MappingSent {
        message: String,
    },
    Mapping {
        message: String,
    },
    MappingChunk {
        chunk: String,
    },

    DiagramSent {
        message: String,
    },
    Diagram {
        message: String,
    },
    DiagramChunk {
        chunk: String,
    },

    DiagramFixing {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parser_error: Option<String>,
    },
    DiagramFixAttempt {
        message: String,
        fix_attempt: u32,
        fix_max_attempts: u32,
        parser_error: String,
    },
    DiagramFixChunk {
        chunk: String,
        fix_attempt: u32,
        fix_max_attempts: u32,
    },
    DiagramFixValidating {
        message: String,
        fix_attempt: u32,
        fix_max_attempts: u32,
    },

    Complete {
        diagram: String,
        explanation: String,
        mapping: String,
    },
    Error {
        error: String,
        error_code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parser_error: Option<String>,
    },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::Complete { .. } | PipelineEvent::Error { .. }
        )
    }

    /// Wire name of the variant.
    pub fn status(&self) -> &'static str {
        match self {
            PipelineEvent::Started { .. } => "started",
            PipelineEvent::ExplanationSent { .. } => "explanation_sent",
            PipelineEvent::Explanation { .. } => "explanation",
            PipelineEvent::ExplanationChunk { .. } => "explanation_chunk",
            PipelineEvent::MappingSent { .. } => "mapping_sent",
            PipelineEvent::Mapping { .. } => "mapping",
            PipelineEvent::MappingChunk { .. } => "mapping_chunk",
            PipelineEvent::DiagramSent { .. } => "diagram_sent",
            PipelineEvent::Diagram { .. } => "diagram",
            PipelineEvent::DiagramChunk { .. } => "diagram_chunk",
            PipelineEvent::DiagramFixing { .. } => "diagram_fixing",
            PipelineEvent::DiagramFixAttempt { .. } => "diagram_fix_attempt",
            PipelineEvent::DiagramFixChunk { .. } => "diagram_fix_chunk",
            PipelineEvent::DiagramFixValidating { .. } => "diagram_fix_validating",
            PipelineEvent::Complete { .. } => "complete",
            PipelineEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("event consumer disconnected")]
    Disconnected,

    #[error("event emitted after terminal event: {0}")]
    AfterTerminal(&'static str),
}

/// Ordered, single-terminal sink for a run's events.
#[derive(Debug)]
pub struct EventEmitter {
    tx: mpsc::Sender<PipelineEvent>,
    terminated: bool,
}

/// Channel capacity for a run. Emission waits for the consumer once full.
pub const EVENT_BUFFER: usize = 64;

/// Create an emitter and the receiving half the consumer reads from.
pub fn channel(capacity: usize) -> (EventEmitter, mpsc::Receiver<PipelineEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventEmitter::new(tx), rx)
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self {
            tx,
            terminated: false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub async fn emit(&mut self, event: PipelineEvent) -> Result<(), EmitError> {
        if self.terminated {
            return Err(EmitError::AfterTerminal(event.status()));
        }
        let terminal = event.is_terminal();
        self.tx
            .send(event)
            .await
            .map_err(|_| EmitError::Disconnected)?;
        if terminal {
            self.terminated = true;
        }
        Ok(())
    }

    /// A second handle on the channel, for watching `closed()` while the
    /// emitter itself is borrowed by the run.
    pub fn sender(&self) -> mpsc::Sender<PipelineEvent> {
        self.tx.clone()
    }
}
