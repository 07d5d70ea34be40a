use crate::config::NihConfig;
use crate::constants::{NIH_FILE_STEM, NIH_PROJECT_URL, NIH_SEARCH_URL, NIH_SOURCE, NIH_SOURCE_LABEL};
use crate::error::Result;
use crate::http_client::HttpClient;
use crate::rate_limiter::{Limits, RateLimiter};
use crate::types::{format_currency, format_date, FundingRecord, FundingSource, OpportunityStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

const INCLUDE_FIELDS: [&str; 5] = [
    "project_title",
    "project_num",
    "project_start_date",
    "project_end_date",
    "award_amount",
];

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    criteria: Criteria<'a>,
    #[serde(rename = "includeFields")]
    include_fields: &'a [&'a str],
    offset: u32,
    limit: u32,
}

#[derive(Debug, Serialize)]
struct Criteria<'a> {
    #[serde(rename = "textSearch")]
    text_search: &'a str,
    #[serde(rename = "fiscalYears")]
    fiscal_years: [i32; 1],
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<Project>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub project_title: Option<String>,
    #[serde(default)]
    pub project_num: Option<String>,
    #[serde(default)]
    pub project_end_date: Option<String>,
    #[serde(default)]
    pub award_amount: Option<f64>,
}

/// Queries NIH RePORTER for awarded projects, one fiscal year per task.
pub struct NihReporterApi {
    client: HttpClient,
    config: NihConfig,
    limiter: RateLimiter,
}

impl NihReporterApi {
    pub fn new(client: HttpClient, config: NihConfig, requests_per_min: u64) -> Self {
        let limiter = RateLimiter::new(Limits {
            requests_per_min: (requests_per_min > 0).then_some(requests_per_min),
            concurrency: Some(config.max_workers),
        });
        Self {
            client,
            config,
            limiter,
        }
    }
}

#[async_trait::async_trait]
impl FundingSource for NihReporterApi {
    fn source_name(&self) -> &'static str {
        NIH_SOURCE
    }

    fn file_stem(&self) -> &'static str {
        NIH_FILE_STEM
    }

    #[instrument(skip(self))]
    async fn fetch_records(&self) -> Result<Vec<FundingRecord>> {
        let mut tasks = JoinSet::new();
        for year in self.config.first_year..=self.config.last_year {
            let client = self.client.clone();
            let limiter = self.limiter.clone();
            let search_text = self.config.search_text.clone();
            let batch_size = self.config.batch_size;
            tasks.spawn(async move {
                let records = fetch_year(&client, &limiter, &search_text, year, batch_size).await;
                (year, records)
            });
        }

        // Reassemble in year order regardless of completion order
        let mut by_year = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((year, records)) => {
                    by_year.insert(year, records);
                }
                Err(e) => error!("NIH fetch task failed: {}", e),
            }
        }

        let records: Vec<FundingRecord> = by_year.into_values().flatten().collect();
        info!("Fetched {} NIH records", records.len());
        Ok(records)
    }
}

/// Page through one fiscal year until an empty page. A request error stops
/// paging and keeps what was gathered so far.
async fn fetch_year(
    client: &HttpClient,
    limiter: &RateLimiter,
    search_text: &str,
    year: i32,
    batch_size: u32,
) -> Vec<FundingRecord> {
    let mut offset = 0;
    let mut records = Vec::new();

    loop {
        let request = SearchRequest {
            criteria: Criteria {
                text_search: search_text,
                fiscal_years: [year],
            },
            include_fields: &INCLUDE_FIELDS,
            offset,
            limit: batch_size,
        };

        let _permit = limiter.acquire().await;
        let response: SearchResponse = match client.post_json(NIH_SEARCH_URL, &request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("NIH error for year {}, offset {}: {}", year, offset, e);
                break;
            }
        };

        if response.results.is_empty() {
            break;
        }
        records.extend(response.results.iter().map(|p| map_project(p, year)));
        offset += batch_size;
    }

    info!("Fetched NIH records for year {}: {}", year, records.len());
    records
}

pub fn map_project(project: &Project, year: i32) -> FundingRecord {
    FundingRecord {
        title: project.project_title.clone().unwrap_or_default(),
        url: format!(
            "{}/{}",
            NIH_PROJECT_URL,
            project.project_num.as_deref().unwrap_or_default()
        ),
        deadline: format_date(project.project_end_date.as_deref().unwrap_or_default()),
        call_for: "Research Grant".to_string(),
        status: OpportunityStatus::Awarded,
        estimated_funding: format_currency(project.award_amount),
        source: NIH_SOURCE_LABEL.to_string(),
        year: year.to_string(),
    }
}
