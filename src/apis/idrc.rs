use crate::constants::{
    IDRC_BASE_URL, IDRC_FILE_STEM, IDRC_SOURCE, IDRC_SOURCE_LABEL, NOT_AVAILABLE, NOT_LISTED,
    NOT_SPECIFIED,
};
use crate::error::{Result, ScraperError};
use crate::http_client::HttpClient;
use crate::types::{FundingRecord, FundingSource, OpportunityStatus};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, instrument};

static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| sel("div.views-row"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| sel("div.views-field-title span.field-content a"));
static DEADLINE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| sel("div.views-field-field-award-deadline time"));
static CALL_FOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| sel("div.views-field-field-award-call-for span.field-content"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Scrapes the IDRC funding listing page.
pub struct IdrcCrawler {
    client: HttpClient,
    url: String,
}

impl IdrcCrawler {
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl FundingSource for IdrcCrawler {
    fn source_name(&self) -> &'static str {
        IDRC_SOURCE
    }

    fn file_stem(&self) -> &'static str {
        IDRC_FILE_STEM
    }

    #[instrument(skip(self))]
    async fn fetch_records(&self) -> Result<Vec<FundingRecord>> {
        info!("Fetching IDRC funding listing");
        let html = self.client.get_text(&self.url).await?;
        let today = chrono::Local::now().date_naive();
        let records = parse_listing(&html, today);

        // An empty listing means the page was not rendered or its layout changed
        if records.is_empty() {
            return Err(ScraperError::Api {
                message: format!("no div.views-row entries at {}", self.url),
            });
        }
        info!("Parsed {} funding entries from IDRC", records.len());
        Ok(records)
    }
}

/// Parse every `div.views-row` in the listing into a record.
pub fn parse_listing(html: &str, today: NaiveDate) -> Vec<FundingRecord> {
    let document = Html::parse_document(html);
    document
        .select(&ROW_SELECTOR)
        .map(|row| parse_row(&row, today))
        .collect()
}

fn parse_row(row: &ElementRef, today: NaiveDate) -> FundingRecord {
    let title_link = row.select(&TITLE_SELECTOR).next();

    let title = title_link
        .map(|a| element_text(&a))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let url = title_link
        .and_then(|a| a.value().attr("href"))
        .map(absolute_url)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let deadline = row
        .select(&DEADLINE_SELECTOR)
        .next()
        .map(|t| element_text(&t))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let call_for = row
        .select(&CALL_FOR_SELECTOR)
        .next()
        .map(|c| element_text(&c))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let deadline_date = NaiveDate::parse_from_str(&deadline, "%B %d, %Y").ok();
    let status = OpportunityStatus::from_deadline(deadline_date, today);
    let year = deadline_date
        .map(|d| d.year().to_string())
        .unwrap_or_else(|| NOT_SPECIFIED.to_string());

    FundingRecord {
        title,
        url,
        deadline,
        call_for,
        status,
        estimated_funding: NOT_LISTED.to_string(),
        source: IDRC_SOURCE_LABEL.to_string(),
        year,
    }
}

fn absolute_url(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}{}", IDRC_BASE_URL, href)
    }
}

fn element_text(el: &ElementRef) -> String {
    let raw = el.text().collect::<String>();
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}
