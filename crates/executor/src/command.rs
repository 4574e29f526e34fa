use std::{
    fmt,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use plan_runner_core::deadline::{Deadline, DeadlineExceeded};

const REDACTED: &str = "***";

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command}: {status} | {stderr}")]
    Failed { command: String, status: ExitStatus, stderr: String },
    #[error("{command}: {source}")]
    Deadline {
        command: String,
        #[source]
        source: DeadlineExceeded,
    },
}

/// External process invocation. Stdin is closed and stderr is always captured.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: PathBuf,
    args: Vec<String>,
    dir: PathBuf,
    envs: Vec<(String, String)>,
    secrets: Vec<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<Path>, dir: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: vec![],
            dir: dir.as_ref().to_path_buf(),
            envs: vec![],
            secrets: vec![],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Mask `secret` wherever it appears in error messages and logs.
    pub fn redact(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// Run to completion, discarding stdout.
    pub async fn run(&self, deadline: &Deadline) -> Result<(), CommandError> {
        self.exec(deadline, false).await.map(|_| ())
    }

    /// Run to completion, returning stdout.
    pub async fn output(&self, deadline: &Deadline) -> Result<String, CommandError> {
        let stdout = self.exec(deadline, true).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn exec(&self, deadline: &Deadline, capture: bool) -> Result<Vec<u8>, CommandError> {
        tracing::debug!(command = %self, dir = %self.dir.display(), "Running command");
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.dir)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(if capture { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Io { command: self.to_string(), source })?;
        // Dropping the future on timeout drops the child, which kills it.
        let output = match deadline.run(child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(CommandError::Io { command: self.to_string(), source }),
            Err(source) => {
                return Err(CommandError::Deadline { command: self.to_string(), source });
            }
        };
        if !output.status.success() {
            let stderr = self.scrub(String::from_utf8_lossy(&output.stderr).trim());
            return Err(CommandError::Failed {
                command: self.to_string(),
                status: output.status,
                stderr,
            });
        }
        Ok(output.stdout)
    }

    fn scrub(&self, s: &str) -> String {
        self.secrets.iter().fold(s.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self.args.iter().map(|a| self.scrub(a)).collect::<Vec<_>>();
        write!(f, "{} {:?}", self.program.display(), args)
    }
}
