//! Mermaid syntax validation through an external checker.
//!
//! The checker is a separate program (by default a Node script wrapping
//! `mermaid.parse`) that reads the diagram on stdin and prints one JSON object:
//! `{"valid": bool, "message"?: str, "line"?: int, "token"?: str, "expected"?: [str]}`.
//! Anything else it does is normalized into an invalid result; the adapter
//! never fails.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Outcome of one validation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: Option<String>,
    pub line: Option<u32>,
    pub token: Option<String>,
    pub expected: Option<Vec<String>>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    /// Invalid result with a normalized message.
    pub fn invalid(message: impl AsRef<str>) -> Self {
        Self {
            valid: false,
            message: Some(normalize_parser_message(Some(message.as_ref()))),
            ..Default::default()
        }
    }
}

const GENERIC_PARSE_FAILURE: &str = "Mermaid syntax is invalid and could not be parsed.";

const SANITIZER_FAILURE: &str =
    "Mermaid parser runtime failed in server context (sanitizer issue).";

/// Checker runtime faults that say nothing about the diagram itself.
const RUNTIME_FAULT_SIGNATURES: &[&str] =
    &["sanitize is not a function", "__TURBOPACK__imported__module"];

/// Rewrite checker messages into something worth showing a user or a model.
pub fn normalize_parser_message(message: Option<&str>) -> String {
    let Some(message) = message.filter(|m| !m.is_empty()) else {
        return GENERIC_PARSE_FAILURE.to_string();
    };

    if RUNTIME_FAULT_SIGNATURES.iter().any(|s| message.contains(s)) {
        return SANITIZER_FAILURE.to_string();
    }
    message.to_string()
}

/// Deterministic multi-line feedback block used as repair input.
pub fn format_validation_feedback(result: &ValidationResult) -> String {
    if result.valid {
        return "No syntax errors found.".to_string();
    }

    let mut details = vec![format!(
        "message: {}",
        result.message.as_deref().unwrap_or("unknown parse error")
    )];
    if let Some(line) = result.line {
        details.push(format!("line: {line}"));
    }
    if let Some(token) = result.token.as_deref().filter(|t| !t.is_empty()) {
        details.push(format!("token: {token}"));
    }
    if let Some(expected) = result.expected.as_ref().filter(|e| !e.is_empty()) {
        details.push(format!("expected: {}", expected.join(", ")));
    }
    details.join("\n")
}

/// Syntax-checking capability.
#[async_trait]
pub trait DiagramValidator: Send + Sync {
    async fn check(&self, diagram: &str) -> ValidationResult;
}

#[derive(Deserialize)]
struct CheckerOutput {
    #[serde(default)]
    valid: bool,
    message: Option<serde_json::Value>,
    line: Option<serde_json::Value>,
    token: Option<serde_json::Value>,
    expected: Option<Vec<serde_json::Value>>,
}

impl CheckerOutput {
    fn into_result(self) -> ValidationResult {
        let message = self.message.and_then(|m| m.as_str().map(str::to_string));
        let message = if self.valid {
            message
        } else {
            Some(normalize_parser_message(message.as_deref()))
        };

        ValidationResult {
            valid: self.valid,
            message,
            line: self
                .line
                .and_then(|l| l.as_u64())
                .and_then(|l| u32::try_from(l).ok()),
            token: self.token.and_then(|t| t.as_str().map(str::to_string)),
            expected: self.expected.map(|items| {
                items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            }),
        }
    }
}

pub const DEFAULT_PROGRAM: &str = "node";

pub const DEFAULT_SCRIPT: &str = "scripts/validate_mermaid.mjs";

/// Runs the checker as a child process per call.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    program: String,
    args: Vec<String>,
}

impl CommandValidator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    async fn run(&self, diagram: &str) -> std::io::Result<std::process::Output> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A checker that exits early closes its stdin; its exit status tells the story.
            if let Err(e) = stdin.write_all(diagram.as_bytes()).await {
                debug!(error = %e, "validator closed stdin early");
            }
        }

        child.wait_with_output().await
    }
}

#[async_trait]
impl DiagramValidator for CommandValidator {
    async fn check(&self, diagram: &str) -> ValidationResult {
        let output = match self.run(diagram).await {
            Ok(output) => output,
            Err(e) => {
                warn!(program = %self.program, error = %e, "validator failed to run");
                return ValidationResult::invalid(e.to_string());
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let message = [stderr, stdout]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or_else(|| "Mermaid validation failed.".to_string());
            warn!(status = ?output.status.code(), "validator exited with failure");
            return ValidationResult::invalid(message);
        }

        match serde_json::from_slice::<CheckerOutput>(&output.stdout) {
            Ok(parsed) => parsed.into_result(),
            Err(_) => ValidationResult::invalid("Mermaid validator returned invalid JSON."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_messages_become_generic_parse_failure() {
        assert_eq!(normalize_parser_message(None), GENERIC_PARSE_FAILURE);
        assert_eq!(normalize_parser_message(Some("")), GENERIC_PARSE_FAILURE);
    }

    #[test]
    fn runtime_faults_are_rewritten() {
        assert_eq!(
            normalize_parser_message(Some("TypeError: o.sanitize is not a function")),
            SANITIZER_FAILURE
        );
        assert_eq!(
            normalize_parser_message(Some("x __TURBOPACK__imported__module__abc y")),
            SANITIZER_FAILURE
        );
        assert_eq!(
            normalize_parser_message(Some("Parse error on line 3")),
            "Parse error on line 3"
        );
    }

    #[test]
    fn feedback_lists_present_fields_in_order() {
        let result = ValidationResult {
            valid: false,
            message: Some("Parse error on line 2".into()),
            line: Some(2),
            token: Some("-->".into()),
            expected: Some(vec!["SEMI".into(), "NEWLINE".into()]),
        };
        assert_eq!(
            format_validation_feedback(&result),
            "message: Parse error on line 2\nline: 2\ntoken: -->\nexpected: SEMI, NEWLINE"
        );
    }

    #[test]
    fn feedback_omits_absent_fields() {
        let result = ValidationResult {
            valid: false,
            message: None,
            line: None,
            token: Some(String::new()),
            expected: Some(vec![]),
        };
        assert_eq!(format_validation_feedback(&result), "message: unknown parse error");
        assert_eq!(
            format_validation_feedback(&ValidationResult::valid()),
            "No syntax errors found."
        );
    }

    #[test]
    fn checker_output_normalizes_invalid_messages_only() {
        let invalid: CheckerOutput = serde_json::from_str(
            r#"{"valid": false, "message": "sanitize is not a function", "line": 4, "token": "x", "expected": ["A", 3]}"#,
        )
        .unwrap();
        let result = invalid.into_result();
        assert!(!result.valid);
        assert_eq!(result.message.as_deref(), Some(SANITIZER_FAILURE));
        assert_eq!(result.line, Some(4));
        assert_eq!(result.expected, Some(vec!["A".to_string()]));

        let valid: CheckerOutput = serde_json::from_str(r#"{"valid": true}"#).unwrap();
        assert_eq!(valid.into_result(), ValidationResult::valid());
    }

    #[cfg(unix)]
    fn shell(script: &str) -> CommandValidator {
        CommandValidator::new("sh", vec!["-c".into(), script.into()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_validator_parses_checker_json() {
        let validator = shell(
            r#"cat > /dev/null; printf '{"valid":false,"message":"Parse error","line":7,"token":"end"}'"#,
        );
        let result = validator.check("flowchart TD\nA-->").await;
        assert!(!result.valid);
        assert_eq!(result.message.as_deref(), Some("Parse error"));
        assert_eq!(result.line, Some(7));
        assert_eq!(result.token.as_deref(), Some("end"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_validator_sees_the_diagram_on_stdin() {
        let validator = shell(
            r#"if grep -q 'flowchart' ; then printf '{"valid":true}'; else printf '{"valid":false}'; fi"#,
        );
        assert!(validator.check("flowchart TD\nA-->B").await.valid);
        assert!(!validator.check("nonsense").await.valid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_validator_reports_crashes_as_invalid() {
        let crashed = shell("cat > /dev/null; echo 'boom' >&2; exit 3").check("x").await;
        assert!(!crashed.valid);
        assert_eq!(crashed.message.as_deref(), Some("boom"));

        let garbage = shell("cat > /dev/null; echo 'not json'").check("x").await;
        assert_eq!(
            garbage.message.as_deref(),
            Some("Mermaid validator returned invalid JSON.")
        );

        let missing = CommandValidator::new("/definitely/not/a/checker", vec![])
            .check("x")
            .await;
        assert!(!missing.valid);
        assert!(missing.message.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_validator_runs_script_files_with_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("check.sh");
        std::fs::write(
            &script,
            "cat > /dev/null\nprintf '{\"valid\":false,\"message\":\"%s\"}' \"$1\"\n",
        )
        .unwrap();

        let validator = CommandValidator::new(
            "sh",
            vec![script.display().to_string(), "strict".into()],
        );
        let result = validator.check("graph TD").await;
        assert!(!result.valid);
        assert_eq!(result.message.as_deref(), Some("strict"));
    }
}
