use crate::constants::{NOT_LISTED, NOT_SPECIFIED};
use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// One funding opportunity row, as written to the CSV and JSON artifacts.
///
/// Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRecord {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Deadline")]
    pub deadline: String,
    #[serde(rename = "Call For")]
    pub call_for: String,
    #[serde(rename = "Opportunity Status")]
    pub status: OpportunityStatus,
    #[serde(rename = "Estimated Funding")]
    pub estimated_funding: String,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Year")]
    pub year: String,
}

impl FundingRecord {
    /// Key used to collapse duplicates across pages and sources.
    pub fn dedupe_key(&self) -> (String, String) {
        (self.title.to_lowercase(), self.source.clone())
    }
}

/// Status column. Sources with their own vocabulary (Grants.gov) land in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpportunityStatus {
    Open,
    Closed,
    Unknown,
    Awarded,
    Other(String),
}

impl OpportunityStatus {
    /// Open when the deadline is today or later.
    pub fn from_deadline(deadline: Option<NaiveDate>, today: NaiveDate) -> Self {
        match deadline {
            Some(d) if d >= today => OpportunityStatus::Open,
            Some(_) => OpportunityStatus::Closed,
            None => OpportunityStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OpportunityStatus::Open => "Open",
            OpportunityStatus::Closed => "Closed",
            OpportunityStatus::Unknown => "Unknown",
            OpportunityStatus::Awarded => "Awarded",
            OpportunityStatus::Other(s) => s,
        }
    }
}

impl From<&str> for OpportunityStatus {
    fn from(s: &str) -> Self {
        match s {
            "Open" => OpportunityStatus::Open,
            "Closed" => OpportunityStatus::Closed,
            "Unknown" => OpportunityStatus::Unknown,
            "Awarded" => OpportunityStatus::Awarded,
            other => OpportunityStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OpportunityStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OpportunityStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(OpportunityStatus::from(s.as_str()))
    }
}

/// Core trait that all funding data sources must implement
#[async_trait::async_trait]
pub trait FundingSource: Send + Sync {
    /// Unique identifier for this source, as used on the CLI
    fn source_name(&self) -> &'static str;

    /// Stem of the `.csv`/`.json` artifact pair written for this source
    fn file_stem(&self) -> &'static str;

    /// Fetch and map all records from this source
    async fn fetch_records(&self) -> Result<Vec<FundingRecord>>;
}

/// Normalise a date string to `YYYY-MM-DD`, or `Not specified` when no known
/// format matches.
pub fn format_date(date_str: &str) -> String {
    parse_date(date_str)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| NOT_SPECIFIED.to_string())
}

pub fn parse_date(date_str: &str) -> Option<NaiveDate> {
    let s = date_str.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    // NIH end dates carry a time component
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.date())
}

/// Format an award amount as `$1,234.56`; missing or zero amounts are `Not listed`.
pub fn format_currency(amount: Option<f64>) -> String {
    let amount = match amount {
        Some(a) if a != 0.0 && a.is_finite() => a,
        _ => return NOT_LISTED.to_string(),
    };

    let negative = amount < 0.0;
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}${}.{}", if negative { "-" } else { "" }, grouped, cents)
}

/// Uppercase the first character and lowercase the rest.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
