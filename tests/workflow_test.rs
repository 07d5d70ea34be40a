use anyhow::Result;
use async_trait::async_trait;
use funding_scraper::config::{Config, WorkflowConfig};
use funding_scraper::error::ScraperError;
use funding_scraper::workflow::{ExternalScraper, RunOutcome, ScrapeStep, Step, Trigger, Workflow};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const BOT_NAME: &str = "funding-bot";
const BOT_EMAIL: &str = "funding-bot@example.org";

fn require_git() {
    let found = Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    assert!(found, "these tests drive a real `git` binary; install git to run them");
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Maintainer")
        .env("GIT_AUTHOR_EMAIL", "maintainer@example.org")
        .env("GIT_COMMITTER_NAME", "Maintainer")
        .env("GIT_COMMITTER_EMAIL", "maintainer@example.org")
        .output()
        .expect("spawn git");
    assert!(out.status.success(), "git {:?} failed: {}", args, String::from_utf8_lossy(&out.stderr));
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// A repository with one initial commit by a human maintainer.
fn init_repo() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    git(dir.path(), &["init", "-q"]);
    std::fs::write(dir.path().join("README.md"), "funding data\n").unwrap();
    git(dir.path(), &["add", "README.md"]);
    git(dir.path(), &["-c", "commit.gpgsign=false", "commit", "-q", "-m", "initial"]);
    dir
}

fn commit_count(dir: &Path) -> usize {
    git(dir, &["rev-list", "--count", "HEAD"]).parse().unwrap()
}

fn config_for(dir: &Path) -> WorkflowConfig {
    WorkflowConfig {
        working_dir: dir.to_path_buf(),
        author_name: BOT_NAME.into(),
        author_email: BOT_EMAIL.into(),
        push: false,
        step_timeout_seconds: 30,
        ..WorkflowConfig::default()
    }
}

/// Scrape step that writes fixed artifact contents on every run.
struct WriteArtifacts {
    csv: Option<String>,
    json: Option<String>,
}

impl WriteArtifacts {
    fn new(csv: Option<&str>, json: Option<&str>) -> Self {
        Self {
            csv: csv.map(String::from),
            json: json.map(String::from),
        }
    }
}

#[async_trait]
impl ScrapeStep for WriteArtifacts {
    async fn run(&self, working_dir: &Path) -> funding_scraper::error::Result<()> {
        if let Some(csv) = &self.csv {
            std::fs::write(working_dir.join("idrc_funding.csv"), csv)?;
        }
        if let Some(json) = &self.json {
            std::fs::write(working_dir.join("idrc_funding.json"), json)?;
        }
        Ok(())
    }
}

const CSV_V1: &str = "Title,URL,Deadline,Call For,Opportunity Status,Estimated Funding,Source,Year\nA,N/A,N/A,N/A,Unknown,Not listed,IDRC - CRDI,Not specified\n";
const JSON_V1: &str = "[\n  {\n    \"Title\": \"A\"\n  }\n]";
const CSV_V2: &str = "Title,URL,Deadline,Call For,Opportunity Status,Estimated Funding,Source,Year\nB,N/A,N/A,N/A,Unknown,Not listed,IDRC - CRDI,Not specified\n";

#[tokio::test]
async fn missing_tabular_artifact_skips_commit_and_succeeds() -> Result<()> {
    require_git();
    let repo = init_repo();
    let before = git(repo.path(), &["rev-parse", "HEAD"]);

    let workflow = Workflow::new(
        config_for(repo.path()),
        Box::new(WriteArtifacts::new(None, Some(JSON_V1))),
    );
    let report = workflow.run(Trigger::Manual).await?;

    assert!(matches!(report.outcome, RunOutcome::ArtifactMissing { .. }));
    assert_eq!(report.steps, vec![Step::Prepare, Step::Scrape, Step::CheckArtifacts]);
    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"]), before);
    Ok(())
}

#[tokio::test]
async fn changed_artifacts_create_exactly_one_bot_commit() -> Result<()> {
    require_git();
    let repo = init_repo();
    let count_before = commit_count(repo.path());

    let workflow = Workflow::new(
        config_for(repo.path()),
        Box::new(WriteArtifacts::new(Some(CSV_V1), Some(JSON_V1))),
    );
    let report = workflow.run(Trigger::Manual).await?;

    let commit = match &report.outcome {
        RunOutcome::Committed { commit, pushed } => {
            assert!(!pushed);
            commit.clone()
        }
        other => panic!("expected a commit, got {other:?}"),
    };
    assert_eq!(commit_count(repo.path()), count_before + 1);
    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"]), commit);
    assert_eq!(
        git(repo.path(), &["log", "-1", "--format=%an <%ae>|%cn <%ce>"]),
        format!("{BOT_NAME} <{BOT_EMAIL}>|{BOT_NAME} <{BOT_EMAIL}>")
    );

    let files = git(repo.path(), &["show", "--name-only", "--format=", "HEAD"]);
    let mut files: Vec<&str> = files.lines().collect();
    files.sort();
    assert_eq!(files, vec!["idrc_funding.csv", "idrc_funding.json"]);

    let subject = git(repo.path(), &["log", "-1", "--format=%s"]);
    assert!(subject.starts_with("Update IDRC funding data "), "subject: {subject}");
    assert_eq!(report.artifacts.len(), 2);
    Ok(())
}

#[tokio::test]
async fn unchanged_artifacts_are_not_recommitted() -> Result<()> {
    require_git();
    let repo = init_repo();
    let workflow = Workflow::new(
        config_for(repo.path()),
        Box::new(WriteArtifacts::new(Some(CSV_V1), Some(JSON_V1))),
    );

    let first = workflow.run(Trigger::Manual).await?;
    assert!(matches!(first.outcome, RunOutcome::Committed { .. }));
    let head = git(repo.path(), &["rev-parse", "HEAD"]);

    let second = workflow.run(Trigger::Manual).await?;
    assert_eq!(second.outcome, RunOutcome::NothingToCommit);
    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"]), head);
    assert_eq!(first.artifacts, second.artifacts);
    Ok(())
}

#[tokio::test]
async fn schedule_and_manual_triggers_share_step_sequence() -> Result<()> {
    require_git();
    let repo = init_repo();
    let step = WriteArtifacts::new(Some(CSV_V1), Some(JSON_V1));
    let workflow = Workflow::new(config_for(repo.path()), Box::new(step));
    let manual = workflow.run(Trigger::Manual).await?;

    let repo2 = init_repo();
    let workflow2 = Workflow::new(
        config_for(repo2.path()),
        Box::new(WriteArtifacts::new(Some(CSV_V2), Some(JSON_V1))),
    );
    let scheduled = workflow2.run(Trigger::Schedule).await?;

    assert_eq!(manual.trigger, Trigger::Manual);
    assert_eq!(scheduled.trigger, Trigger::Schedule);
    assert_eq!(manual.steps, scheduled.steps);
    assert_eq!(
        manual.steps,
        vec![Step::Prepare, Step::Scrape, Step::CheckArtifacts, Step::Persist]
    );
    Ok(())
}

#[tokio::test]
async fn committed_changes_are_pushed_to_upstream() -> Result<()> {
    require_git();
    let remote = tempfile::tempdir()?;
    git(remote.path(), &["init", "-q", "--bare"]);
    let repo = init_repo();
    let remote_path = remote.path().to_string_lossy().to_string();
    git(repo.path(), &["remote", "add", "origin", &remote_path]);
    git(repo.path(), &["push", "-q", "-u", "origin", "HEAD"]);

    let config = WorkflowConfig {
        push: true,
        ..config_for(repo.path())
    };
    let workflow = Workflow::new(config, Box::new(WriteArtifacts::new(Some(CSV_V1), None)));
    let report = workflow.run(Trigger::Manual).await?;

    assert!(matches!(report.outcome, RunOutcome::Committed { pushed: true, .. }));
    assert_eq!(report.steps.last(), Some(&Step::Push));
    assert_eq!(
        git(repo.path(), &["rev-parse", "@{u}"]),
        git(repo.path(), &["rev-parse", "HEAD"])
    );
    Ok(())
}

#[tokio::test]
async fn failing_scraper_aborts_without_commit() -> Result<()> {
    require_git();
    let repo = init_repo();
    let before = commit_count(repo.path());
    let workflow = Workflow::new(
        config_for(repo.path()),
        Box::new(ExternalScraper::new(
            "echo 'Title' > idrc_funding.csv; exit 2",
            Duration::from_secs(10),
        )),
    );

    let err = workflow.run(Trigger::Manual).await.unwrap_err();
    assert!(matches!(err, ScraperError::Command { code: 2, .. }));
    assert_eq!(commit_count(repo.path()), before);
    Ok(())
}

#[tokio::test]
async fn install_failure_stops_before_scraping() -> Result<()> {
    require_git();
    let repo = init_repo();
    let config = WorkflowConfig {
        install_command: Some("exit 7".into()),
        ..config_for(repo.path())
    };
    let workflow = Workflow::new(
        config,
        Box::new(ExternalScraper::new("touch scraped.marker", Duration::from_secs(10))),
    );

    assert!(workflow.run(Trigger::Manual).await.is_err());
    assert!(!repo.path().join("scraped.marker").exists());
    Ok(())
}

#[tokio::test]
async fn external_scraper_output_is_committed() -> Result<()> {
    require_git();
    let repo = init_repo();
    let workflow = Workflow::new(
        config_for(repo.path()),
        Box::new(ExternalScraper::new(
            "printf 'Title\\nX\\n' > idrc_funding.csv && printf '[]' > idrc_funding.json",
            Duration::from_secs(10),
        )),
    );

    let report = workflow.run(Trigger::Manual).await?;
    assert!(matches!(report.outcome, RunOutcome::Committed { .. }));
    let tracked = git(repo.path(), &["ls-files"]);
    assert!(tracked.lines().any(|l| l == "idrc_funding.json"));
    Ok(())
}

const IDRC_LISTING: &str = r#"<html><body>
<div class="views-row">
  <div class="views-field views-field-title">
    <span class="field-content"><a href="/en/funding/climate-adaptation">Climate adaptation research</a></span>
  </div>
  <div class="views-field views-field-field-award-deadline">
    <div class="field-content"><time>March 3, 2099</time></div>
  </div>
  <div class="views-field views-field-field-award-call-for">
    <span class="field-content">Research teams</span>
  </div>
</div>
</body></html>"#;

const IDRC_NOT_RENDERED: &str = "<html><body><p>Loading...</p></body></html>";

/// Serve `body` as a 200 HTML response to every connection; returns the listing URL.
async fn serve_html(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}/en/funding", addr)
}

/// A local URL nothing is listening on.
async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/en/funding", addr)
}

fn builtin_config(dir: &Path, idrc_url: String) -> Config {
    let mut config = Config::default();
    config.sources.idrc.url = idrc_url;
    config.http.timeout_seconds = 5;
    config.workflow = config_for(dir);
    config
}

/// A repository whose HEAD already tracks a populated IDRC artifact pair.
fn repo_with_committed_artifacts() -> TempDir {
    let repo = init_repo();
    std::fs::write(repo.path().join("idrc_funding.csv"), CSV_V1).unwrap();
    std::fs::write(repo.path().join("idrc_funding.json"), JSON_V1).unwrap();
    git(repo.path(), &["add", "idrc_funding.csv", "idrc_funding.json"]);
    git(repo.path(), &["-c", "commit.gpgsign=false", "commit", "-q", "-m", "seed data"]);
    repo
}

#[tokio::test]
async fn builtin_scraper_commits_fetched_listing() -> Result<()> {
    require_git();
    let repo = init_repo();
    let url = serve_html(IDRC_LISTING).await;

    let workflow = Workflow::from_config(&builtin_config(repo.path(), url));
    let report = workflow.run(Trigger::Manual).await?;

    assert!(matches!(report.outcome, RunOutcome::Committed { .. }));
    let committed = git(repo.path(), &["show", "HEAD:idrc_funding.csv"]);
    assert!(committed.contains("Climate adaptation research"), "csv: {committed}");
    assert!(committed.contains("Research teams"));
    let json = git(repo.path(), &["show", "HEAD:idrc_funding.json"]);
    assert!(json.contains("\"Opportunity Status\": \"Open\""), "json: {json}");
    Ok(())
}

#[tokio::test]
async fn empty_listing_aborts_and_keeps_committed_data() -> Result<()> {
    require_git();
    let repo = repo_with_committed_artifacts();
    let head = git(repo.path(), &["rev-parse", "HEAD"]);
    let url = serve_html(IDRC_NOT_RENDERED).await;

    let workflow = Workflow::from_config(&builtin_config(repo.path(), url));
    let err = workflow.run(Trigger::Manual).await.unwrap_err();

    assert!(matches!(err, ScraperError::Scrape(_)), "unexpected error: {err}");
    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"]), head);
    assert_eq!(git(repo.path(), &["show", "HEAD:idrc_funding.csv"]), CSV_V1.trim_end());
    assert_eq!(std::fs::read_to_string(repo.path().join("idrc_funding.csv"))?, CSV_V1);
    Ok(())
}

#[tokio::test]
async fn unreachable_source_fails_the_run() -> Result<()> {
    require_git();
    let repo = repo_with_committed_artifacts();
    let head = git(repo.path(), &["rev-parse", "HEAD"]);
    let url = closed_url().await;

    let workflow = Workflow::from_config(&builtin_config(repo.path(), url));
    let err = workflow.run(Trigger::Manual).await.unwrap_err();

    assert!(matches!(err, ScraperError::Scrape(_)), "unexpected error: {err}");
    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"]), head);
    Ok(())
}
