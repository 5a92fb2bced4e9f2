//! The three generation stages and the streaming micro-protocol they share.

use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::debug;

use super::error::GenerationError;
use super::events::{EventEmitter, PipelineEvent};
use crate::gateway::{PromptSection, ReasoningEffort, TextGenerator, TextRequest};
use crate::prompts::{DIAGRAM_INSTRUCTIONS, EXPLANATION_INSTRUCTIONS, MAPPING_INSTRUCTIONS};
use crate::source::RepositorySnapshot;

const MAPPING_START_TAG: &str = "<component_mapping>";
const MAPPING_END_TAG: &str = "</component_mapping>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Explanation,
    Mapping,
    Diagram,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Explanation => "explanation",
            Stage::Mapping => "mapping",
            Stage::Diagram => "diagram",
        }
    }

    /// Human label used in the `_sent` message.
    fn label(&self) -> &'static str {
        match self {
            Stage::Explanation => "explanation",
            Stage::Mapping => "component mapping",
            Stage::Diagram => "diagram generation",
        }
    }

    fn caller(&self) -> &'static str {
        match self {
            Stage::Explanation => "pipeline::explanation",
            Stage::Mapping => "pipeline::mapping",
            Stage::Diagram => "pipeline::diagram",
        }
    }

    pub fn instructions(&self) -> &'static str {
        match self {
            Stage::Explanation => EXPLANATION_INSTRUCTIONS,
            Stage::Mapping => MAPPING_INSTRUCTIONS,
            Stage::Diagram => DIAGRAM_INSTRUCTIONS,
        }
    }

    pub fn effort(&self) -> ReasoningEffort {
        match self {
            Stage::Explanation => ReasoningEffort::Medium,
            Stage::Mapping | Stage::Diagram => ReasoningEffort::Low,
        }
    }

    pub fn request(
        &self,
        model: &str,
        sections: Vec<PromptSection>,
        api_key: Option<String>,
    ) -> TextRequest {
        TextRequest::new(model, self.instructions(), sections, self.caller())
            .effort(self.effort())
            .api_key(api_key)
    }

    fn sent_event(&self, model: &str) -> PipelineEvent {
        let message = format!("Sending {} request to {model}...", self.label());
        match self {
            Stage::Explanation => PipelineEvent::ExplanationSent { message },
            Stage::Mapping => PipelineEvent::MappingSent { message },
            Stage::Diagram => PipelineEvent::DiagramSent { message },
        }
    }

    fn progress_event(&self) -> PipelineEvent {
        match self {
            Stage::Explanation => PipelineEvent::Explanation {
                message: "Analyzing repository structure...".into(),
            },
            Stage::Mapping => PipelineEvent::Mapping {
                message: "Creating component mapping...".into(),
            },
            Stage::Diagram => PipelineEvent::Diagram {
                message: "Generating diagram...".into(),
            },
        }
    }

    fn chunk_event(&self, chunk: String) -> PipelineEvent {
        match self {
            Stage::Explanation => PipelineEvent::ExplanationChunk { chunk },
            Stage::Mapping => PipelineEvent::MappingChunk { chunk },
            Stage::Diagram => PipelineEvent::DiagramChunk { chunk },
        }
    }
}

/// Stage 1 input: the listing and the README.
pub fn explanation_request(
    model: &str,
    snapshot: &RepositorySnapshot,
    api_key: Option<String>,
) -> TextRequest {
    Stage::Explanation.request(
        model,
        vec![
            PromptSection::new("file_tree", snapshot.file_tree.clone()),
            PromptSection::new("readme", snapshot.readme.clone()),
        ],
        api_key,
    )
}

/// Everything from the first start tag up to the first end tag.
///
/// Falls back to the raw response when either tag is missing.
pub fn extract_component_mapping(response: &str) -> String {
    match (
        response.find(MAPPING_START_TAG),
        response.find(MAPPING_END_TAG),
    ) {
        (Some(start), Some(end)) if start <= end => response[start..end].to_string(),
        (Some(_), Some(_)) => String::new(),
        _ => response.to_string(),
    }
}

pub fn strip_mermaid_code_fences(text: &str) -> String {
    text.replace("```mermaid", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Per-run handle for issuing stage calls.
pub(crate) struct StageRunner<'a> {
    pub generator: &'a dyn TextGenerator,
    pub model: &'a str,
    pub api_key: Option<&'a str>,
    pub pacing_delay: Duration,
}

impl StageRunner<'_> {
    /// Announce, pause, then stream one stage to completion.
    pub async fn run(
        &self,
        stage: Stage,
        sections: Vec<PromptSection>,
        emitter: &mut EventEmitter,
    ) -> Result<String, GenerationError> {
        emitter.emit(stage.sent_event(self.model)).await?;
        if !self.pacing_delay.is_zero() {
            tokio::time::sleep(self.pacing_delay).await;
        }
        emitter.emit(stage.progress_event()).await?;

        let started = Instant::now();
        let request = stage.request(self.model, sections, self.api_key.map(str::to_string));
        let output = self
            .stream(request, emitter, |chunk| stage.chunk_event(chunk))
            .await?;

        debug!(
            stage = stage.name(),
            chars = output.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stage complete"
        );
        Ok(output)
    }

    /// Forward every increment as it arrives and return the concatenation.
    pub async fn stream<F>(
        &self,
        request: TextRequest,
        emitter: &mut EventEmitter,
        to_event: F,
    ) -> Result<String, GenerationError>
    where
        F: Fn(String) -> PipelineEvent,
    {
        let mut stream = self.generator.stream_text(request).await?;
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            output.push_str(&chunk);
            emitter.emit(to_event(chunk)).await?;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_extraction_keeps_start_tag_and_drops_end_tag() {
        let raw = "thinking...\n<component_mapping>\n1. api: src/api\n</component_mapping>\ntrailer";
        assert_eq!(
            extract_component_mapping(raw),
            "<component_mapping>\n1. api: src/api\n"
        );
    }

    #[test]
    fn mapping_extraction_tolerates_missing_tags() {
        assert_eq!(extract_component_mapping("1. api: src/api"), "1. api: src/api");
        assert_eq!(
            extract_component_mapping("<component_mapping>\nunterminated"),
            "<component_mapping>\nunterminated"
        );
        assert_eq!(
            extract_component_mapping("dangling</component_mapping>"),
            "dangling</component_mapping>"
        );
    }

    #[test]
    fn fences_are_stripped_and_trimmed() {
        assert_eq!(
            strip_mermaid_code_fences("```mermaid\nflowchart TD\n  A-->B\n```\n"),
            "flowchart TD\n  A-->B"
        );
        assert_eq!(strip_mermaid_code_fences("  graph LR  "), "graph LR");
    }

    #[test]
    fn stage_requests_carry_stage_effort_and_credential() {
        let req = Stage::Mapping.request(
            "gpt-5-mini",
            vec![PromptSection::new("explanation", "e")],
            Some("sk-user".into()),
        );
        assert_eq!(req.model, "gpt-5-mini");
        assert_eq!(req.instructions, MAPPING_INSTRUCTIONS);
        assert_eq!(req.reasoning_effort, Some(ReasoningEffort::Low));
        assert_eq!(req.api_key.as_deref(), Some("sk-user"));

        let snapshot = RepositorySnapshot {
            default_branch: "main".into(),
            file_tree: "src/lib.rs".into(),
            readme: "# demo".into(),
        };
        let first = explanation_request("gpt-5.2", &snapshot, None);
        assert_eq!(first.reasoning_effort, Some(ReasoningEffort::Medium));
        let names: Vec<_> = first.sections.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["file_tree", "readme"]);
    }

    #[test]
    fn sent_messages_name_the_model() {
        assert_eq!(
            Stage::Diagram.sent_event("gpt-5.2"),
            PipelineEvent::DiagramSent {
                message: "Sending diagram generation request to gpt-5.2...".into()
            }
        );
    }
}
