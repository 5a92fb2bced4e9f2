//! Prompt templates for the diagram generation stages.
//!
//! Domain logic for stage instructions and structured input. Provider-agnostic.

use crate::gateway::PromptSection;

// =============================================================================
// Structured input
// =============================================================================

/// Render named sections as `<name>\n{value}\n</name>` blocks joined by newlines.
///
/// Values are inserted verbatim: file trees and READMEs routinely contain
/// markup the model should see as-is.
pub fn format_sections(sections: &[PromptSection]) -> String {
    sections
        .iter()
        .map(|s| format!("<{name}>\n{value}\n</{name}>", name = s.name, value = s.value))
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// Stage instructions
// =============================================================================

/// Stage 1: plain-language architecture explanation.
pub const EXPLANATION_INSTRUCTIONS: &str = concat!(
    "You are a principal software engineer explaining to a principal engineer how a ",
    "repository is put together, so that a system design diagram can be drawn from your ",
    "explanation afterwards.\n\n",
    "You are given the repository's file tree in <file_tree> tags and its README in ",
    "<readme> tags.\n\n",
    "Work out what kind of project this is (web application, library, CLI, service, ",
    "monorepo, ...), the major components and how they interact, the data flow between ",
    "them, and any external systems they depend on. Prefer facts you can ground in the ",
    "file tree or README over guesses, and say so when you are inferring.\n\n",
    "Describe the architecture as the set of boxes and arrows a diagram should contain: ",
    "name each component, say which directories or files implement it, and describe every ",
    "relationship between components with its direction. Group related components the way ",
    "the codebase groups them.\n\n",
    "Wrap your whole answer in <explanation> tags.",
);

/// Stage 2: map diagram components to concrete paths.
pub const MAPPING_INSTRUCTIONS: &str = concat!(
    "You are mapping key components of a system design to the files and directories that ",
    "implement them.\n\n",
    "You are given an architecture explanation in <explanation> tags and the repository's ",
    "file tree in <file_tree> tags.\n\n",
    "For each component named in the explanation, find the single most relevant path in the ",
    "file tree: a directory when the component spans a directory, a file when one file ",
    "embodies it. Only use paths that appear verbatim in the file tree. Skip components ",
    "that have no clear home rather than inventing a path.\n\n",
    "Output a numbered list inside <component_mapping> tags, one line per component, in ",
    "the form `N. Component name: path/in/repo`.",
);

/// Stage 3: draft the Mermaid diagram.
pub const DIAGRAM_INSTRUCTIONS: &str = concat!(
    "You are turning an architecture explanation into a Mermaid.js flowchart.\n\n",
    "You are given the explanation in <explanation> tags and a mapping from components to ",
    "repository paths in <component_mapping> tags.\n\n",
    "Rules:\n",
    "- Start with `flowchart TD` (or `flowchart LR` when the system is wider than deep).\n",
    "- One node per component; group related nodes with `subgraph` blocks.\n",
    "- Label every edge that carries meaning, using `A -->|\"label\"| B`.\n",
    "- Quote every node label that contains spaces or punctuation: `A[\"Label (x)\"]`.\n",
    "- Never put a `:` or a node id inside a subgraph title.\n",
    "- For every component that has a mapped path, add a click directive on its own line: ",
    "`click NodeId \"path/in/repo\"`. Use the path exactly as given, without a URL.\n",
    "- Add `classDef` styles sparingly and keep colors readable in light and dark themes.\n\n",
    "Return only the Mermaid source. No prose, no explanation, no code fences.",
);

/// Repair loop: fix a diagram using parser feedback.
pub const FIX_DIAGRAM_INSTRUCTIONS: &str = concat!(
    "You are a Mermaid.js syntax repair specialist.\n\n",
    "You are given a Mermaid diagram that failed to parse in <mermaid_code> tags, the ",
    "parser's feedback in <parser_error> tags, and for context the architecture ",
    "explanation in <explanation> tags and the component mapping in <component_mapping> ",
    "tags.\n\n",
    "Fix every syntax error the parser reports and any others you can see, while keeping ",
    "the diagram's nodes, edges, subgraphs, styles and click directives intact. Change as ",
    "little as possible: quote labels with special characters, close unbalanced blocks, ",
    "repair malformed arrows, and rename node ids that collide with Mermaid keywords.\n\n",
    "Return only the corrected Mermaid source. No prose, no explanation, no code fences.",
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_sections_keeps_order_and_values_verbatim() {
        let rendered = format_sections(&[
            PromptSection::new("explanation", "<explanation>x</explanation>"),
            PromptSection::new("component_mapping", "1. API: src/"),
        ]);
        assert_eq!(
            rendered,
            "<explanation>\n<explanation>x</explanation>\n</explanation>\n\
             <component_mapping>\n1. API: src/\n</component_mapping>"
        );
    }

    #[test]
    fn format_sections_of_nothing_is_empty() {
        assert_eq!(format_sections(&[]), "");
    }
}
