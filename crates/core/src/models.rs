use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_API_BASE_URL;

/// A request to plan one pull request, as published by the webhook app.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkRequest {
    pub request_id: String,
    pub repo: Repo,
    pub pull_request: PullRequest,
    pub installation: Installation,
    pub work: Work,
    #[serde(rename = "github_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Repo {
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PullRequest {
    pub number: u64,
    pub head_sha: String,
    pub head_ref: String,
    pub base_ref: String,
}

/// Installation credential, scoped to a single repository and short-lived.
#[derive(Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Installation {
    pub id: u64,
    pub token: String,
}

impl fmt::Debug for Installation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installation").field("id", &self.id).field("token", &"[redacted]").finish()
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Work {
    pub dir: String,
    /// Advisory only; the runner uses whatever tool is installed.
    pub tofu_version: String,
    pub plan_id: String,
}

impl Work {
    /// The working directory, unless it is the repository root.
    pub fn subdir(&self) -> Option<&str> {
        let dir = self.dir.trim();
        (!dir.is_empty() && dir != ".").then_some(dir)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing repo.full_name")]
    MissingRepo,
    #[error("invalid repo.full_name: {0}")]
    InvalidRepo(String),
    #[error("missing pull_request.number")]
    MissingPullRequest,
    #[error("missing pull_request.head_sha")]
    MissingHeadSha,
    #[error("missing installation.token")]
    MissingToken,
}

impl WorkRequest {
    /// Fill in defaults for fields the publisher may omit.
    pub fn apply_defaults(&mut self, default_api_base_url: &str) {
        if self.api_base_url.trim().is_empty() {
            self.api_base_url = if default_api_base_url.is_empty() {
                DEFAULT_API_BASE_URL.to_string()
            } else {
                default_api_base_url.to_string()
            };
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.repo.full_name.is_empty() {
            return Err(ValidationError::MissingRepo);
        }
        if self.owner_repo().is_none() {
            return Err(ValidationError::InvalidRepo(self.repo.full_name.clone()));
        }
        if self.pull_request.number == 0 {
            return Err(ValidationError::MissingPullRequest);
        }
        if self.pull_request.head_sha.is_empty() {
            return Err(ValidationError::MissingHeadSha);
        }
        if self.installation.token.is_empty() {
            return Err(ValidationError::MissingToken);
        }
        Ok(())
    }

    /// Split `repo.full_name` into owner and name.
    pub fn owner_repo(&self) -> Option<(&str, &str)> {
        match self.repo.full_name.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Some((owner, repo))
            }
            _ => None,
        }
    }
}

/// Rendered plan output, possibly truncated.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PlanResult {
    pub text: String,
    pub truncated: bool,
}

impl PlanResult {
    pub const MAX_CHARS: usize = 200_000;
    pub const TRUNCATED_SUFFIX: &'static str = "\n... (truncated)";

    pub fn new(text: String) -> Self {
        match text.char_indices().nth(Self::MAX_CHARS) {
            Some((idx, _)) => {
                let mut text = text;
                text.truncate(idx);
                text.push_str(Self::TRUNCATED_SUFFIX);
                Self { text, truncated: true }
            }
            None => Self { text, truncated: false },
        }
    }
}
