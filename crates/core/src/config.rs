use std::{
    fs::File,
    io::{BufReader, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { port: 8080, log_format: LogFormat::Text } }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Used for requests that do not carry their own API base URL.
    pub api_base_url: String,
    /// Upper bound for each individual REST call.
    pub request_timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self { api_base_url: DEFAULT_API_BASE_URL.to_string(), request_timeout_secs: 30 }
    }
}

impl GitHubConfig {
    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub git: PathBuf,
    pub tofu: PathBuf,
    /// Deadline for a whole request, measured from receipt.
    pub request_timeout_secs: u64,
    /// Parent directory for workspaces. Defaults to the system temp dir.
    pub workspace_root: Option<PathBuf>,
    /// Upstream subscription or endpoint identifier, informational only.
    pub subscription: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
            tofu: PathBuf::from("tofu"),
            request_timeout_secs: 15 * 60,
            workspace_root: None,
            subscription: None,
        }
    }
}

impl RunnerConfig {
    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
}

impl Config {
    /// Load the config file at `path`, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open {}", path.display()));
            }
        };
        serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply `PORT` and `GITHUB_API_BASE_URL` overrides.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = var("PORT").filter(|v| !v.is_empty()) {
            self.server.port = port.parse().with_context(|| format!("Invalid PORT: {port}"))?;
        }
        if let Some(base) = var("GITHUB_API_BASE_URL").filter(|v| !v.is_empty()) {
            self.github.api_base_url = base;
        }
        Ok(())
    }
}
