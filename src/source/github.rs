//! GitHub REST implementation of [`RepositorySource`].

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{RepositorySnapshot, RepositorySource, SourceError};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Path fragments that never help explain an architecture.
const EXCLUDED_PATTERNS: &[&str] = &[
    "node_modules/",
    "vendor/",
    "venv/",
    ".min.",
    ".pyc",
    ".pyo",
    ".pyd",
    ".so",
    ".dll",
    ".class",
    ".jpg",
    ".jpeg",
    ".png",
    ".gif",
    ".ico",
    ".svg",
    ".ttf",
    ".woff",
    ".webp",
    "__pycache__/",
    ".cache/",
    ".tmp/",
    "yarn.lock",
    "poetry.lock",
    "*.log",
    ".vscode/",
    ".idea/",
];

fn should_include_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    !EXCLUDED_PATTERNS.iter().any(|p| lower.contains(p))
}

#[derive(Deserialize)]
struct RepoResponse {
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: Option<String>,
}

#[derive(Deserialize)]
struct ReadmeResponse {
    content: Option<String>,
    encoding: Option<String>,
}

/// GitHub client. Anonymous unless a token is configured or supplied per call.
#[derive(Debug, Clone)]
pub struct GitHubSource {
    client: reqwest::Client,
    api_url: String,
    default_token: Option<String>,
}

impl GitHubSource {
    pub fn new(token: Option<String>) -> Result<Self, SourceError> {
        Self::with_config(token, DEFAULT_API_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_config(
        token: Option<String>,
        api_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("repodiagram"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            default_token: token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        })
    }

    fn token<'a>(&'a self, credential: Option<&'a str>) -> Option<&'a str> {
        credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or(self.default_token.as_deref())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        token: Option<&str>,
        not_found_message: &str,
    ) -> Result<T, SourceError> {
        let mut request = self.client.get(&url);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(SourceError::NotFound(not_found_message.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }

    async fn default_branch(
        &self,
        owner: &str,
        repo: &str,
        token: Option<&str>,
    ) -> Result<String, SourceError> {
        let data: RepoResponse = self
            .get_json(
                format!("{}/repos/{owner}/{repo}", self.api_url),
                token,
                "Repository not found.",
            )
            .await?;
        Ok(data
            .default_branch
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "main".to_string()))
    }

    async fn file_tree(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        token: Option<&str>,
    ) -> Result<String, SourceError> {
        let data: TreeResponse = self
            .get_json(
                format!(
                    "{}/repos/{owner}/{repo}/git/trees/{branch}?recursive=1",
                    self.api_url
                ),
                token,
                "Could not fetch repository file tree.",
            )
            .await?;

        let paths: Vec<String> = data
            .tree
            .into_iter()
            .filter_map(|entry| entry.path)
            .filter(|path| should_include_file(path))
            .collect();

        if paths.is_empty() {
            return Err(SourceError::EmptyListing);
        }
        Ok(paths.join("\n"))
    }

    async fn readme(
        &self,
        owner: &str,
        repo: &str,
        token: Option<&str>,
    ) -> Result<String, SourceError> {
        let data: ReadmeResponse = self
            .get_json(
                format!("{}/repos/{owner}/{repo}/readme", self.api_url),
                token,
                "No README found for the specified repository.",
            )
            .await?;

        let content = data
            .content
            .filter(|c| !c.is_empty())
            .ok_or(SourceError::MissingReadme)?;

        if data.encoding.as_deref() == Some("base64") {
            // GitHub wraps base64 payloads at 60 columns.
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = STANDARD
                .decode(compact)
                .map_err(|e| SourceError::Decode(format!("README is not valid base64: {e}")))?;
            return String::from_utf8(bytes)
                .map_err(|e| SourceError::Decode(format!("README is not valid UTF-8: {e}")));
        }
        Ok(content)
    }
}

#[async_trait]
impl RepositorySource for GitHubSource {
    async fn fetch(
        &self,
        owner: &str,
        repo: &str,
        credential: Option<&str>,
    ) -> Result<RepositorySnapshot, SourceError> {
        let token = self.token(credential);

        let default_branch = self.default_branch(owner, repo, token).await?;
        let file_tree = self.file_tree(owner, repo, &default_branch, token).await?;
        let readme = self.readme(owner, repo, token).await?;

        debug!(
            owner,
            repo,
            branch = %default_branch,
            files = file_tree.lines().count(),
            "fetched repository snapshot"
        );

        Ok(RepositorySnapshot {
            default_branch,
            file_tree,
            readme,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_list_filters_noise_case_insensitively() {
        assert!(should_include_file("src/main.rs"));
        assert!(should_include_file("docs/Guide.md"));
        assert!(!should_include_file("web/node_modules/react/index.js"));
        assert!(!should_include_file("assets/Logo.PNG"));
        assert!(!should_include_file("yarn.lock"));
        assert!(!should_include_file(".idea/workspace.xml"));
    }

    #[test]
    fn request_token_overrides_configured_token() {
        let source = GitHubSource::new(Some("env-token".into())).unwrap();
        assert_eq!(source.token(Some("user-token")), Some("user-token"));
        assert_eq!(source.token(Some(" ")), Some("env-token"));
        assert_eq!(source.token(None), Some("env-token"));

        let anonymous = GitHubSource::new(None).unwrap();
        assert_eq!(anonymous.token(None), None);
    }
}
