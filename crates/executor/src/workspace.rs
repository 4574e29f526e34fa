use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use plan_runner_core::{
    deadline::Deadline,
    models::WorkRequest,
    timings::{Stage, Timings, timed},
    util::join_normalized,
};
use tempfile::TempDir;
use url::Url;

use crate::{Executor, command::Cmd};

const DEFAULT_HOST: &str = "github.com";

/// Everything except RFC 3986 unreserved characters, `%` included.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Temporary checkout of a single commit. Removed from disk when dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    repo_dir: PathBuf,
    work_dir: PathBuf,
}

impl Workspace {
    pub fn root(&self) -> &Path { self.dir.path() }

    pub fn repo_dir(&self) -> &Path { &self.repo_dir }

    /// The resolved `work.dir` inside the checkout.
    pub fn work_dir(&self) -> &Path { &self.work_dir }

    /// Remove the workspace on the blocking pool, reporting any error instead of ignoring it.
    pub async fn close(self) -> std::io::Result<()> {
        let dir = self.dir;
        tokio::task::spawn_blocking(move || dir.close()).await.map_err(std::io::Error::other)?
    }

    /// Remove the workspace, logging a failure.
    pub async fn discard(self) {
        let root = self.root().to_path_buf();
        if let Err(e) = self.close().await {
            tracing::warn!("Failed to remove workspace {}: {e}", root.display());
        }
    }
}

impl Executor {
    fn allocate(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("runner-");
        match &self.workspace_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .context("Failed to create workspace")
    }

    /// Check out `pull_request.head_sha` into a fresh workspace. The workspace is removed
    /// again if any step fails.
    pub async fn materialize(
        &self,
        request: &WorkRequest,
        deadline: &Deadline,
        timings: &mut Timings,
    ) -> Result<Workspace> {
        let dir = self.allocate()?;
        let repo_dir = dir.path().join("repo");
        let mut workspace = Workspace { dir, work_dir: repo_dir.clone(), repo_dir };
        match self.checkout(&mut workspace, request, deadline, timings).await {
            Ok(()) => Ok(workspace),
            Err(e) => {
                workspace.discard().await;
                Err(e)
            }
        }
    }

    async fn checkout(
        &self,
        workspace: &mut Workspace,
        request: &WorkRequest,
        deadline: &Deadline,
        timings: &mut Timings,
    ) -> Result<()> {
        tokio::fs::create_dir(&workspace.repo_dir)
            .await
            .context("Failed to create repo directory")?;

        let token = &request.installation.token;
        let remote_url = token_remote_url(&request.repo.clone_url, &request.repo.full_name, token)?;
        let repo_dir = workspace.repo_dir.clone();
        let git = |args: &[&str]| {
            Cmd::new(&self.git, &repo_dir)
                .arg("-c")
                .arg(format!("safe.directory={}", repo_dir.display()))
                .args(args.iter().copied())
                .env("GIT_TERMINAL_PROMPT", "0")
                .redact(token.as_str())
                .redact(remote_url.password().unwrap_or_default())
        };

        git(&["init", "-q"]).run(deadline).await.context("git init")?;
        git(&["remote", "add", "origin", remote_url.as_str()])
            .run(deadline)
            .await
            .context("git remote add")?;
        let sha = request.pull_request.head_sha.as_str();
        timed(timings, Stage::GitFetch, git(&["fetch", "--depth=1", "origin", sha]).run(deadline))
            .await
            .context("git fetch")?;
        timed(timings, Stage::GitCheckout, git(&["checkout", "-q", "FETCH_HEAD"]).run(deadline))
            .await
            .context("git checkout")?;

        if let Some(subdir) = request.work.subdir() {
            let work_dir = join_normalized(&repo_dir, subdir);
            match tokio::fs::metadata(&work_dir).await {
                Ok(metadata) if metadata.is_dir() => {}
                _ => bail!("work.dir not found: {subdir}"),
            }
            workspace.work_dir = work_dir;
        }
        tracing::debug!(
            sha,
            work_dir = %workspace.work_dir.display(),
            "Materialized workspace"
        );
        Ok(())
    }
}

/// `https://x-access-token:<token>@<host>/<full_name>.git`, with the host taken from
/// `clone_url` when it has one.
pub fn token_remote_url(clone_url: &str, full_name: &str, token: &str) -> Result<Url> {
    let host = match Url::parse(clone_url) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => DEFAULT_HOST.to_string(),
        },
        Err(_) => DEFAULT_HOST.to_string(),
    };
    let mut url = Url::parse(&format!("https://{host}/{full_name}.git"))
        .with_context(|| format!("Invalid remote for {full_name}"))?;
    url.set_username("x-access-token").map_err(|_| anyhow!("Invalid remote for {full_name}"))?;
    let token = utf8_percent_encode(token, USERINFO).to_string();
    url.set_password(Some(&token)).map_err(|_| anyhow!("Invalid remote for {full_name}"))?;
    Ok(url)
}
