//! Repository metadata source.
//!
//! The pipeline only needs three facts about a repository: its default branch,
//! a flattened file listing, and the README. `RepositorySource` hides where
//! they come from.

pub mod github;

use thiserror::Error;

pub use github::GitHubSource;

/// Read-only input shared by every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySnapshot {
    pub default_branch: String,
    /// Newline-delimited file paths.
    pub file_tree: String,
    pub readme: String,
}

/// Errors raised while fetching a repository snapshot.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0}")]
    NotFound(String),

    #[error("Could not fetch repository file tree. Repository might be empty or inaccessible.")]
    EmptyListing,

    #[error("No README found for the specified repository.")]
    MissingReadme,

    #[error("GitHub request failed ({status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("GitHub returned an unreadable payload: {0}")]
    Decode(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait::async_trait]
pub trait RepositorySource: Send + Sync {
    /// Fetch branch, listing and README for `owner/repo`.
    ///
    /// `credential` is the caller's token, if any; implementations fall back
    /// to their own configured credential.
    async fn fetch(
        &self,
        owner: &str,
        repo: &str,
        credential: Option<&str>,
    ) -> Result<RepositorySnapshot, SourceError>;
}
