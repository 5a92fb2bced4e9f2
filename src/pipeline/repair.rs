//! Bounded self-correction of a diagram the validator rejected.

use tracing::{info, warn};

use super::error::GenerationError;
use super::events::{EventEmitter, PipelineEvent};
use super::stages::{strip_mermaid_code_fences, StageRunner};
use crate::gateway::{PromptSection, ReasoningEffort, TextRequest};
use crate::prompts::FIX_DIAGRAM_INSTRUCTIONS;
use crate::validator::{format_validation_feedback, DiagramValidator};

/// Default repair budget per run.
pub const MAX_FIX_ATTEMPTS: u32 = 3;

pub(crate) struct RepairContext<'a> {
    pub validator: &'a dyn DiagramValidator,
    pub explanation: &'a str,
    pub mapping: &'a str,
    pub max_attempts: u32,
}

fn fix_request(
    runner: &StageRunner<'_>,
    ctx: &RepairContext<'_>,
    candidate: &str,
    feedback: &str,
) -> TextRequest {
    TextRequest::new(
        runner.model,
        FIX_DIAGRAM_INSTRUCTIONS,
        vec![
            PromptSection::new("mermaid_code", candidate),
            PromptSection::new("parser_error", feedback),
            PromptSection::new("explanation", ctx.explanation),
            PromptSection::new("component_mapping", ctx.mapping),
        ],
        "pipeline::repair",
    )
    .effort(ReasoningEffort::Low)
    .api_key(runner.api_key.map(str::to_string))
}

/// Validate `candidate`, repairing it if needed. Returns a diagram the
/// validator accepted.
pub(crate) async fn ensure_valid(
    runner: &StageRunner<'_>,
    ctx: &RepairContext<'_>,
    mut candidate: String,
    emitter: &mut EventEmitter,
) -> Result<String, GenerationError> {
    let mut result = ctx.validator.check(&candidate).await;
    if result.valid {
        return Ok(candidate);
    }

    let max = ctx.max_attempts;
    emitter
        .emit(PipelineEvent::DiagramFixing {
            message: "Diagram generated. Mermaid syntax validation failed, starting auto-fix loop..."
                .into(),
            parser_error: Some(format_validation_feedback(&result)),
        })
        .await?;

    let mut attempt = 1;
    while !result.valid && attempt <= max {
        let feedback = format_validation_feedback(&result);
        info!(fix_attempt = attempt, max, "repairing diagram");

        emitter
            .emit(PipelineEvent::DiagramFixAttempt {
                message: format!("Fixing Mermaid syntax (attempt {attempt}/{max})..."),
                fix_attempt: attempt,
                fix_max_attempts: max,
                parser_error: feedback.clone(),
            })
            .await?;

        let repaired = runner
            .stream(
                fix_request(runner, ctx, &candidate, &feedback),
                emitter,
                |chunk| PipelineEvent::DiagramFixChunk {
                    chunk,
                    fix_attempt: attempt,
                    fix_max_attempts: max,
                },
            )
            .await?;
        candidate = strip_mermaid_code_fences(&repaired);

        emitter
            .emit(PipelineEvent::DiagramFixValidating {
                message: format!("Validating Mermaid syntax after attempt {attempt}/{max}..."),
                fix_attempt: attempt,
                fix_max_attempts: max,
            })
            .await?;

        result = ctx.validator.check(&candidate).await;
        attempt += 1;
    }

    if !result.valid {
        let feedback = format_validation_feedback(&result);
        warn!(attempts = attempt - 1, %feedback, "diagram still invalid after repair");
        return Err(GenerationError::ValidationUnresolved { feedback });
    }

    emitter
        .emit(PipelineEvent::DiagramFixing {
            message: "Mermaid syntax validated. Finalizing diagram output...".into(),
            parser_error: None,
        })
        .await?;
    Ok(candidate)
}
