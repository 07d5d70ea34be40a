//! The scheduled collection workflow: prepare, scrape, check, persist.
//!
//! Steps run strictly in sequence. A missing tabular artifact and an empty
//! diff both end the run successfully without a commit; every other failure
//! aborts the run with an error.

pub mod git;
pub mod schedule;
pub mod subprocess;

use crate::apis::create_source;
use crate::config::{Config, WorkflowConfig};
use crate::error::{Result, ScraperError};
use crate::http_client::HttpClient;
use crate::pipeline::Pipeline;
use crate::storage::{ArtifactPaths, FileStorage, Storage};
use crate::types::FundingSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use git::{CommitResult, GitRepo, Identity};
use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What started a run. Both triggers execute the same step sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Schedule,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Schedule => f.write_str("schedule"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Prepare,
    Scrape,
    CheckArtifacts,
    Persist,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Committed { commit: String, pushed: bool },
    NothingToCommit,
    ArtifactMissing { expected: String },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Committed { commit, .. } => write!(f, "committed {}", commit),
            RunOutcome::NothingToCommit => f.write_str("nothing to commit"),
            RunOutcome::ArtifactMissing { expected } => write!(f, "artifact missing: {}", expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDigest {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<Step>,
    pub artifacts: Vec<ArtifactDigest>,
    pub outcome: RunOutcome,
}

/// The scraper invoked by the workflow. Its only contract is to leave the
/// artifacts in `working_dir`.
#[async_trait]
pub trait ScrapeStep: Send + Sync {
    async fn run(&self, working_dir: &Path) -> Result<()>;
}

/// Runs the in-crate sources and writes their artifacts into the working dir.
/// Any source failure fails the step.
pub struct BuiltinScraper {
    config: Config,
}

impl BuiltinScraper {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ScrapeStep for BuiltinScraper {
    async fn run(&self, working_dir: &Path) -> Result<()> {
        let client = HttpClient::new(&self.config.http)?;
        let mut sources: Vec<Box<dyn FundingSource>> = Vec::new();
        for name in &self.config.workflow.sources {
            let source = create_source(name, &self.config, &client)
                .ok_or_else(|| ScraperError::Config(format!("Unknown source '{}'", name)))?;
            sources.push(source);
        }

        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(working_dir));
        let summary = Pipeline::run_all(sources, storage).await?;

        // Unlike the standalone `scrape` command, a failed source fails the step
        let failures: Vec<String> = summary
            .sources
            .iter()
            .flat_map(|r| r.errors.iter().map(move |e| format!("{}: {}", r.source_name, e)))
            .collect();
        if !failures.is_empty() {
            return Err(ScraperError::Scrape(failures.join("; ")));
        }
        Ok(())
    }
}

/// Runs an external scraper command line with no extra arguments.
pub struct ExternalScraper {
    command: String,
    timeout: Duration,
}

impl ExternalScraper {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ScrapeStep for ExternalScraper {
    async fn run(&self, working_dir: &Path) -> Result<()> {
        let output = subprocess::run_shell(&self.command, working_dir, self.timeout).await?;
        if !output.stdout.trim().is_empty() {
            info!("{}", output.stdout.trim());
        }
        Ok(())
    }
}

pub struct Workflow {
    config: WorkflowConfig,
    scraper: Box<dyn ScrapeStep>,
    repo: GitRepo,
}

impl Workflow {
    pub fn new(config: WorkflowConfig, scraper: Box<dyn ScrapeStep>) -> Self {
        let repo = GitRepo::new(config.working_dir.clone(), config.step_timeout());
        Self {
            config,
            scraper,
            repo,
        }
    }

    /// Build from the full config, choosing the external scraper when one is configured.
    pub fn from_config(config: &Config) -> Self {
        let scraper: Box<dyn ScrapeStep> = match &config.workflow.scraper_command {
            Some(cmd) => Box::new(ExternalScraper::new(cmd.clone(), config.workflow.step_timeout())),
            None => Box::new(BuiltinScraper::new(config.clone())),
        };
        Self::new(config.workflow.clone(), scraper)
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths::for_stem(&self.config.working_dir, &self.config.artifact_base)
    }

    fn identity(&self) -> Identity {
        Identity {
            name: self.config.author_name.clone(),
            email: self.config.author_email.clone(),
        }
    }

    fn commit_message(&self, now: DateTime<Utc>) -> String {
        format!(
            "{} {}",
            self.config.commit_prefix,
            now.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    #[instrument(skip(self), fields(working_dir = %self.config.working_dir.display()))]
    pub async fn run(&self, trigger: Trigger) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut steps = Vec::new();
        info!(%run_id, %trigger, "🚀 Starting workflow run");

        steps.push(Step::Prepare);
        if let Some(install) = &self.config.install_command {
            info!("📦 Preparing environment: {}", install);
            subprocess::run_shell(install, &self.config.working_dir, self.config.step_timeout()).await?;
        }

        steps.push(Step::Scrape);
        info!("📡 Running scraper");
        self.scraper.run(&self.config.working_dir).await?;

        steps.push(Step::CheckArtifacts);
        let paths = self.artifact_paths();
        let artifacts = digest_existing(&[&paths.csv, &paths.json])?;
        if !paths.csv.exists() {
            warn!("⚠️  {} not found, skipping commit", paths.csv.display());
            return Ok(self.finish(
                run_id,
                trigger,
                started_at,
                steps,
                artifacts,
                RunOutcome::ArtifactMissing {
                    expected: paths.csv.to_string_lossy().to_string(),
                },
            ));
        }

        steps.push(Step::Persist);
        let mut to_commit = vec![relative_to(&paths.csv, &self.config.working_dir)];
        if paths.json.exists() {
            to_commit.push(relative_to(&paths.json, &self.config.working_dir));
        } else {
            warn!("{} not found, committing tabular file only", paths.json.display());
        }

        let message = self.commit_message(Utc::now());
        let outcome = match self.repo.commit_paths(&to_commit, &message, &self.identity()).await? {
            CommitResult::NothingToCommit => RunOutcome::NothingToCommit,
            CommitResult::Committed { commit } => {
                let pushed = if self.config.push {
                    steps.push(Step::Push);
                    self.repo.push().await?;
                    true
                } else {
                    false
                };
                RunOutcome::Committed { commit, pushed }
            }
        };

        Ok(self.finish(run_id, trigger, started_at, steps, artifacts, outcome))
    }

    fn finish(
        &self,
        run_id: Uuid,
        trigger: Trigger,
        started_at: DateTime<Utc>,
        steps: Vec<Step>,
        artifacts: Vec<ArtifactDigest>,
        outcome: RunOutcome,
    ) -> RunReport {
        let outcome_label = match &outcome {
            RunOutcome::Committed { .. } => "committed",
            RunOutcome::NothingToCommit => "nothing_to_commit",
            RunOutcome::ArtifactMissing { .. } => "artifact_missing",
        };
        counter!("funding_workflow_runs_total", "trigger" => trigger.to_string(), "outcome" => outcome_label)
            .increment(1);
        info!(%run_id, outcome = %outcome, "✅ Workflow run finished");

        RunReport {
            run_id,
            trigger,
            started_at,
            finished_at: Utc::now(),
            steps,
            artifacts,
            outcome,
        }
    }
}

fn digest_existing(paths: &[&PathBuf]) -> Result<Vec<ArtifactDigest>> {
    let mut digests = Vec::new();
    for path in paths {
        if path.exists() {
            let bytes = std::fs::read(path)?;
            digests.push(ArtifactDigest {
                path: path.to_string_lossy().to_string(),
                sha256: hex::encode(Sha256::digest(&bytes)),
            });
        }
    }
    Ok(digests)
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
