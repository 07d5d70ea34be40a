use crate::constants::{IDRC_FILE_STEM, IDRC_FUNDING_URL, IDRC_SOURCE};
use crate::error::{Result, ScraperError};
use chrono::NaiveTime;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub output: OutputConfig,
    pub sources: SourcesConfig,
    pub workflow: WorkflowConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub user_agent: String,
    /// Upper bound on requests per minute across concurrent fetches; 0 disables it
    pub requests_per_min: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: concat!("funding_scraper/", env!("CARGO_PKG_VERSION")).to_string(),
            requests_per_min: 0,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            log_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub idrc: IdrcConfig,
    pub nih: NihConfig,
    pub grants_gov: GrantsGovConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdrcConfig {
    pub url: String,
}

impl Default for IdrcConfig {
    fn default() -> Self {
        Self {
            url: IDRC_FUNDING_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NihConfig {
    pub search_text: String,
    pub first_year: i32,
    pub last_year: i32,
    pub batch_size: u32,
    pub max_workers: u32,
}

impl Default for NihConfig {
    fn default() -> Self {
        Self {
            search_text: "machine learning".to_string(),
            first_year: 2015,
            last_year: 2024,
            batch_size: 500,
            max_workers: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrantsGovConfig {
    pub page_size: u32,
    pub max_workers: u32,
    pub funding_categories: String,
    pub funding_instruments: String,
    pub opp_statuses: String,
}

impl Default for GrantsGovConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            max_workers: 8,
            funding_categories: "HL|ED|EN|ST".to_string(),
            funding_instruments: "G".to_string(),
            opp_statuses: "posted".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Directory the workflow runs in; must be inside a git work tree
    pub working_dir: PathBuf,
    /// Optional environment preparation command, run through `sh -c`
    pub install_command: Option<String>,
    /// External scraper program; when unset the built-in scraper runs `sources`
    pub scraper_command: Option<String>,
    pub sources: Vec<String>,
    /// Artifacts are `<artifact_base>.csv` and `<artifact_base>.json`
    pub artifact_base: String,
    pub author_name: String,
    pub author_email: String,
    pub commit_prefix: String,
    pub push: bool,
    /// Daily fire time, `HH:MM` in UTC
    pub schedule_at: String,
    pub step_timeout_seconds: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            install_command: None,
            scraper_command: None,
            sources: vec![IDRC_SOURCE.to_string()],
            artifact_base: IDRC_FILE_STEM.to_string(),
            author_name: "github-actions".to_string(),
            author_email: "github-actions@github.com".to_string(),
            commit_prefix: "Update IDRC funding data".to_string(),
            push: true,
            schedule_at: "00:00".to_string(),
            step_timeout_seconds: 1800,
        }
    }
}

impl WorkflowConfig {
    pub fn schedule_time(&self) -> Result<NaiveTime> {
        parse_schedule_time(&self.schedule_at)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9898,
        }
    }
}

pub fn parse_schedule_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| ScraperError::Config(format!("Invalid schedule time '{}': {}", s, e)))
}

impl Config {
    /// Load from `FUNDING_CONFIG` or `config.toml`. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var("FUNDING_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                ScraperError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
            })?;
            Self::from_toml(&content)?
        } else {
            Config::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("FUNDING_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(dir);
        }
        if let Ok(push) = std::env::var("FUNDING_GIT_PUSH") {
            self.workflow.push = matches!(push.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(at) = std::env::var("FUNDING_SCHEDULE_AT") {
            self.workflow.schedule_at = at;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.workflow.schedule_time()?;
        if self.workflow.artifact_base.trim().is_empty() {
            return Err(ScraperError::Config("workflow.artifact_base must not be empty".into()));
        }
        if self.sources.nih.first_year > self.sources.nih.last_year {
            return Err(ScraperError::Config(format!(
                "sources.nih.first_year ({}) is after last_year ({})",
                self.sources.nih.first_year, self.sources.nih.last_year
            )));
        }
        if self.sources.nih.batch_size == 0 || self.sources.grants_gov.page_size == 0 {
            return Err(ScraperError::Config("page sizes must be positive".into()));
        }
        Ok(())
    }
}
