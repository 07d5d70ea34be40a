use crate::config::GrantsGovConfig;
use crate::constants::{
    GRANTS_GOV_DETAIL_URL, GRANTS_GOV_FILE_STEM, GRANTS_GOV_SEARCH_URL, GRANTS_GOV_SOURCE,
    GRANTS_GOV_SOURCE_LABEL, NOT_LISTED, NOT_SPECIFIED,
};
use crate::error::Result;
use crate::http_client::HttpClient;
use crate::rate_limiter::{Limits, RateLimiter};
use crate::types::{capitalize, format_date, FundingRecord, FundingSource, OpportunityStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    start_record: u64,
    rows: u32,
    funding_categories: String,
    funding_instruments: String,
    opp_statuses: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: SearchData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchData {
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub opp_hits: Vec<OppHit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OppHit {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agency_name: Option<String>,
    #[serde(default)]
    pub close_date: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub opp_status: Option<String>,
}

/// Pulls posted grant opportunities from the Grants.gov search2 API,
/// fanning out over result pages.
pub struct GrantsGovApi {
    client: HttpClient,
    config: GrantsGovConfig,
    limiter: RateLimiter,
}

impl GrantsGovApi {
    pub fn new(client: HttpClient, config: GrantsGovConfig, requests_per_min: u64) -> Self {
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

    fn request(&self, start_record: u64, rows: u32) -> SearchRequest {
        SearchRequest {
            start_record,
            rows,
            funding_categories: self.config.funding_categories.clone(),
            funding_instruments: self.config.funding_instruments.clone(),
            opp_statuses: self.config.opp_statuses.clone(),
        }
    }

    async fn total_records(&self) -> Result<u64> {
        let _permit = self.limiter.acquire().await;
        let response: SearchResponse = self
            .client
            .post_json(GRANTS_GOV_SEARCH_URL, &self.request(1, 1))
            .await?;
        Ok(response.data.hit_count)
    }
}

#[async_trait::async_trait]
impl FundingSource for GrantsGovApi {
    fn source_name(&self) -> &'static str {
        GRANTS_GOV_SOURCE
    }

    fn file_stem(&self) -> &'static str {
        GRANTS_GOV_FILE_STEM
    }

    #[instrument(skip(self))]
    async fn fetch_records(&self) -> Result<Vec<FundingRecord>> {
        let total = match self.total_records().await {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to fetch Grants.gov total record count: {}", e);
                return Ok(Vec::new());
            }
        };

        let page_size = u64::from(self.config.page_size);
        let pages = page_count(total, page_size);
        info!("Grants.gov reports {} records across {} pages", total, pages);

        let mut tasks = JoinSet::new();
        for page in 0..pages {
            let client = self.client.clone();
            let limiter = self.limiter.clone();
            let start_record = page * page_size + 1;
            let request = self.request(start_record, self.config.page_size);
            tasks.spawn(async move {
                let _permit = limiter.acquire().await;
                let result = client
                    .post_json::<_, SearchResponse>(GRANTS_GOV_SEARCH_URL, &request)
                    .await;
                (page, start_record, result)
            });
        }

        let mut by_page = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((page, start_record, Ok(response))) => {
                    info!("Grants.gov page {} fetched", start_record);
                    by_page.insert(page, response.data.opp_hits);
                }
                Ok((_, start_record, Err(e))) => {
                    warn!("Grants.gov error at record {}: {}", start_record, e);
                }
                Err(e) => error!("Grants.gov fetch task failed: {}", e),
            }
        }

        let records = map_hits(by_page.into_values().flatten());
        info!("Fetched {} unique Grants.gov records", records.len());
        Ok(records)
    }
}

pub fn page_count(total: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

/// Map hits to records, keeping the first occurrence of each
/// `(lowercase title, agency)` pair.
pub fn map_hits(hits: impl IntoIterator<Item = OppHit>) -> Vec<FundingRecord> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for hit in hits {
        let title = hit.title.as_deref().unwrap_or_default().trim().to_string();
        let agency = hit
            .agency_name
            .clone()
            .unwrap_or_else(|| GRANTS_GOV_SOURCE_LABEL.to_string());
        if !seen.insert((title.to_lowercase(), agency.clone())) {
            continue;
        }

        let deadline = format_date(hit.close_date.as_deref().unwrap_or_default());
        let year = if deadline == NOT_SPECIFIED {
            NOT_SPECIFIED.to_string()
        } else {
            deadline.chars().take(4).collect()
        };

        records.push(FundingRecord {
            title,
            url: format!("{}/{}", GRANTS_GOV_DETAIL_URL, id_text(hit.id.as_ref())),
            deadline,
            call_for: capitalize(hit.doc_type.as_deref().unwrap_or("Grant")),
            status: OpportunityStatus::from(
                capitalize(hit.opp_status.as_deref().unwrap_or("Unknown")).as_str(),
            ),
            estimated_funding: NOT_LISTED.to_string(),
            source: format!("{} ({})", GRANTS_GOV_SOURCE_LABEL, agency),
            year,
        });
    }

    records
}

// The API returns ids as strings or numbers depending on endpoint version
fn id_text(id: Option<&serde_json::Value>) -> String {
    match id {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => "None".to_string(),
        Some(other) => other.to_string(),
    }
}
