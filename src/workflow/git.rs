use super::subprocess::{run_checked, run_command, CommandSpec};
use crate::error::{Result, ScraperError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// Commit author/committer used for automated commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Outcome of staging and committing a set of paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    Committed { commit: String },
    NothingToCommit,
}

/// Drives the `git` binary inside one work tree.
#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
    timeout: Duration,
}

impl GitRepo {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn git(&self) -> CommandSpec<'_> {
        CommandSpec::new("git", &self.dir, self.timeout)
    }

    pub async fn add(&self, paths: &[PathBuf]) -> Result<()> {
        let spec = self.git().arg("add").arg("--").args(path_args(paths));
        run_checked(&spec).await.map_err(git_error)?;
        Ok(())
    }

    /// True when the index differs from HEAD for any of `paths`.
    pub async fn has_staged_changes(&self, paths: &[PathBuf]) -> Result<bool> {
        let spec = self
            .git()
            .args(["diff", "--cached", "--quiet", "--"])
            .args(path_args(paths));
        let output = run_command(&spec).await?;
        match output.exit_code {
            0 => Ok(false),
            1 => Ok(true),
            code => Err(ScraperError::Git(format!(
                "`{}` exited with {}: {}",
                spec.display(),
                code,
                output.stderr.trim()
            ))),
        }
    }

    /// Commit only `paths`, authored and committed by `identity`.
    pub async fn commit(&self, paths: &[PathBuf], message: &str, identity: &Identity) -> Result<String> {
        let spec = self
            .git()
            .args(["commit", "-m", message, "--"])
            .args(path_args(paths))
            .env("GIT_AUTHOR_NAME", &identity.name)
            .env("GIT_AUTHOR_EMAIL", &identity.email)
            .env("GIT_COMMITTER_NAME", &identity.name)
            .env("GIT_COMMITTER_EMAIL", &identity.email);
        run_checked(&spec).await.map_err(git_error)?;
        self.head().await
    }

    /// Stage `paths` and commit them if anything changed.
    #[instrument(skip(self, identity), fields(dir = %self.dir.display()))]
    pub async fn commit_paths(&self, paths: &[PathBuf], message: &str, identity: &Identity) -> Result<CommitResult> {
        self.add(paths).await?;
        if !self.has_staged_changes(paths).await? {
            info!("No changes to commit");
            return Ok(CommitResult::NothingToCommit);
        }
        let commit = self.commit(paths, message, identity).await?;
        info!("Created commit {}", commit);
        Ok(CommitResult::Committed { commit })
    }

    pub async fn head(&self) -> Result<String> {
        let output = run_checked(&self.git().args(["rev-parse", "HEAD"]))
            .await
            .map_err(git_error)?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn push(&self) -> Result<()> {
        run_checked(&self.git().arg("push")).await.map_err(git_error)?;
        info!("Pushed to remote");
        Ok(())
    }
}

fn path_args(paths: &[PathBuf]) -> impl Iterator<Item = String> + '_ {
    paths.iter().map(|p| p.to_string_lossy().into_owned())
}

fn git_error(e: ScraperError) -> ScraperError {
    match e {
        ScraperError::Command { command, code, stderr } => {
            ScraperError::Git(format!("`{}` exited with {}: {}", command, code, stderr))
        }
        other => other,
    }
}
