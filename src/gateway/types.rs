//! Core types for the text-generation gateway.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use crate::prompts::format_sections;

// =============================================================================
// MESSAGES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Reasoning effort hint forwarded to reasoning models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// One named block of structured input, rendered as `<name>…</name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSection {
    pub name: &'static str,
    pub value: String,
}

impl PromptSection {
    pub fn new(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Request for a text generation (streamed) or an input token count.
#[derive(Debug, Clone)]
pub struct TextRequest {
    /// Provider model id, e.g. "gpt-5.2".
    pub model: String,
    /// System instructions.
    pub instructions: String,
    /// Structured user input.
    pub sections: Vec<PromptSection>,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Caller-supplied credential; overrides the provider's default key.
    pub api_key: Option<String>,
    pub max_output_tokens: Option<u32>,
    /// Which code path made this call, for logging.
    pub caller: &'static str,
}

impl TextRequest {
    pub fn new(
        model: impl Into<String>,
        instructions: impl Into<String>,
        sections: Vec<PromptSection>,
        caller: &'static str,
    ) -> Self {
        Self {
            model: model.into(),
            instructions: instructions.into(),
            sections,
            reasoning_effort: None,
            api_key: None,
            max_output_tokens: None,
            caller,
        }
    }

    pub fn effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    /// System + user messages as sent to the provider.
    pub fn to_messages(&self) -> Vec<Message> {
        vec![
            Message::system(&self.instructions),
            Message::user(format_sections(&self.sections)),
        ]
    }
}

/// Lazy, finite, non-restartable sequence of text increments.
///
/// Dropping the stream releases the underlying provider response.
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_messages_renders_sections_into_the_user_turn() {
        let req = TextRequest::new(
            "gpt-5.2",
            "explain",
            vec![
                PromptSection::new("file_tree", "src/main.rs"),
                PromptSection::new("readme", "# hi"),
            ],
            "test",
        )
        .effort(ReasoningEffort::Medium);

        let messages = req.to_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "explain");
        assert_eq!(
            messages[1].content,
            "<file_tree>\nsrc/main.rs\n</file_tree>\n<readme>\n# hi\n</readme>"
        );
        assert_eq!(req.reasoning_effort.map(|e| e.as_str()), Some("medium"));
    }
}
