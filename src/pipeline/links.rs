//! Rewrites `click` directives into absolute GitHub URLs.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static CLICK_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"click ([^\s"]+)\s+"([^"]+)""#).expect("valid click regex"));

/// Point every `click <node> "<path>"` at the file or directory on GitHub.
///
/// Paths containing a `.` that do not end in `/` are treated as files (`blob`),
/// everything else as directories (`tree`).
pub fn process_click_events(diagram: &str, owner: &str, repo: &str, branch: &str) -> String {
    CLICK_DIRECTIVE
        .replace_all(diagram, |caps: &Captures<'_>| {
            let node = &caps[1];
            let path = caps[2]
                .trim()
                .trim_matches(|c| c == '"' || c == '\'');
            let kind = if path.contains('.') && !path.ends_with('/') {
                "blob"
            } else {
                "tree"
            };
            format!(r#"click {node} "https://github.com/{owner}/{repo}/{kind}/{branch}/{path}""#)
        })
        .into_owned()
}
