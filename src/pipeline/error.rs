//! Failure taxonomy for a generation run.

use thiserror::Error;

use super::events::{EmitError, ErrorCode, PipelineEvent};
use crate::gate::GateRejection;
use crate::gateway::ProviderError;
use crate::source::SourceError;

pub const UNRESOLVED_SYNTAX_MESSAGE: &str =
    "Generated Mermaid remained syntactically invalid after auto-fix attempts. Please retry generation.";

pub const STREAM_FAILED_MESSAGE: &str = "Streaming generation failed.";

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Malformed or incomplete request. `reason` is for logs only.
    #[error("Invalid request payload.")]
    RequestValidation { reason: String },

    #[error("{0}")]
    UpstreamFetch(#[from] SourceError),

    #[error("{}", .0.message())]
    Budget(GateRejection),

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("{}", UNRESOLVED_SYNTAX_MESSAGE)]
    ValidationUnresolved { feedback: String },

    #[error("{0}")]
    Internal(String),

    /// The consumer went away. Nothing is left to report to.
    #[error("event consumer disconnected")]
    Disconnected,
}

impl GenerationError {
    pub fn request_validation(reason: impl Into<String>) -> Self {
        Self::RequestValidation {
            reason: reason.into(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::RequestValidation { .. } => ErrorCode::ValidationError,
            Self::Budget(GateRejection::CredentialRequired { .. }) => ErrorCode::ApiKeyRequired,
            Self::Budget(GateRejection::SizeExceeded { .. }) => ErrorCode::TokenLimitExceeded,
            Self::ValidationUnresolved { .. } => ErrorCode::MermaidSyntaxUnresolved,
            Self::UpstreamFetch(_) | Self::Provider(_) | Self::Internal(_) | Self::Disconnected => {
                ErrorCode::StreamFailed
            }
        }
    }

    /// The terminal event for this failure, or `None` when nobody is listening.
    pub fn into_event(self) -> Option<PipelineEvent> {
        if matches!(self, Self::Disconnected) {
            return None;
        }
        let error_code = self.error_code();
        let parser_error = match &self {
            Self::ValidationUnresolved { feedback } => Some(feedback.clone()),
            _ => None,
        };
        let error = match self.to_string() {
            message if message.is_empty() => STREAM_FAILED_MESSAGE.to_string(),
            message => message,
        };
        Some(PipelineEvent::Error {
            error,
            error_code,
            parser_error,
        })
    }
}

impl From<EmitError> for GenerationError {
    fn from(err: EmitError) -> Self {
        match err {
            EmitError::Disconnected => Self::Disconnected,
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_rejections_map_to_their_codes() {
        let credential = GenerationError::Budget(GateRejection::CredentialRequired {
            estimate: 60_000,
            threshold: 50_000,
        });
        assert_eq!(credential.error_code(), ErrorCode::ApiKeyRequired);
        assert!(credential.to_string().starts_with("File tree and README combined exceeds"));

        let size = GenerationError::Budget(GateRejection::SizeExceeded {
            estimate: 300_000,
            limit: 195_000,
        });
        assert_eq!(size.error_code(), ErrorCode::TokenLimitExceeded);
    }

    #[test]
    fn unresolved_syntax_carries_feedback() {
        let event = GenerationError::ValidationUnresolved {
            feedback: "message: bad arrow".into(),
        }
        .into_event()
        .unwrap();
        assert_eq!(
            event,
            PipelineEvent::Error {
                error: UNRESOLVED_SYNTAX_MESSAGE.into(),
                error_code: ErrorCode::MermaidSyntaxUnresolved,
                parser_error: Some("message: bad arrow".into()),
            }
        );
    }

    #[test]
    fn upstream_failures_keep_their_message() {
        let event = GenerationError::from(SourceError::NotFound("Repository not found.".into()))
            .into_event()
            .unwrap();
        assert_eq!(
            event,
            PipelineEvent::Error {
                error: "Repository not found.".into(),
                error_code: ErrorCode::StreamFailed,
                parser_error: None,
            }
        );
    }

    #[test]
    fn empty_messages_fall_back_to_generic_failure() {
        let event = GenerationError::Internal(String::new()).into_event().unwrap();
        assert!(matches!(
            event,
            PipelineEvent::Error { ref error, .. } if error == STREAM_FAILED_MESSAGE
        ));
    }

    #[test]
    fn disconnect_produces_no_event() {
        assert!(GenerationError::from(EmitError::Disconnected)
            .into_event()
            .is_none());
    }
}
