use crate::error::{Result, ScraperError};
use crate::types::FundingRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// CSV header, in column order
pub const CSV_HEADERS: [&str; 8] = [
    "Title",
    "URL",
    "Deadline",
    "Call For",
    "Opportunity Status",
    "Estimated Funding",
    "Source",
    "Year",
];

/// Locations of one written `.csv` + `.json` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub csv: PathBuf,
    pub json: PathBuf,
}

impl ArtifactPaths {
    pub fn for_stem(dir: &Path, stem: &str) -> Self {
        Self {
            csv: dir.join(format!("{stem}.csv")),
            json: dir.join(format!("{stem}.json")),
        }
    }
}

/// Storage trait for persisting scraped records as tabular + structured artifacts
#[async_trait]
pub trait Storage: Send + Sync {
    async fn write_records(&self, stem: &str, records: &[FundingRecord]) -> Result<ArtifactPaths>;
}

/// Writes `<dir>/<stem>.csv` and `<dir>/<stem>.json`, replacing earlier files.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn write_records(&self, stem: &str, records: &[FundingRecord]) -> Result<ArtifactPaths> {
        fs::create_dir_all(&self.dir)?;
        let paths = ArtifactPaths::for_stem(&self.dir, stem);

        fs::write(&paths.csv, to_csv(records)?)?;
        fs::write(&paths.json, to_json(records)?)?;

        debug!(
            "Wrote {} records to {} and {}",
            records.len(),
            paths.csv.display(),
            paths.json.display()
        );
        Ok(paths)
    }
}

/// Render records as CSV with a header row, even when there are no records.
pub fn to_csv(records: &[FundingRecord]) -> Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(CSV_HEADERS)?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.into_inner()
        .map_err(|e| ScraperError::Io(e.into_error()))
}

pub fn to_json(records: &[FundingRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// In-memory storage implementation for development/testing
#[derive(Default)]
pub struct InMemoryStorage {
    written: Arc<Mutex<HashMap<String, Vec<FundingRecord>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stem: &str) -> Option<Vec<FundingRecord>> {
        self.written
            .lock()
            .ok()
            .and_then(|w| w.get(stem).cloned())
    }

    pub fn stems(&self) -> Vec<String> {
        let mut stems: Vec<String> = self
            .written
            .lock()
            .map(|w| w.keys().cloned().collect())
            .unwrap_or_default();
        stems.sort();
        stems
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn write_records(&self, stem: &str, records: &[FundingRecord]) -> Result<ArtifactPaths> {
        if let Ok(mut written) = self.written.lock() {
            written.insert(stem.to_string(), records.to_vec());
        }
        Ok(ArtifactPaths::for_stem(Path::new("memory"), stem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OpportunityStatus;

    fn record() -> FundingRecord {
        FundingRecord {
            title: "Water, sanitation and \"health\"".into(),
            url: "https://idrc-crdi.ca/en/funding/wash".into(),
            deadline: "May 5, 2031".into(),
            call_for: "Research proposals".into(),
            status: OpportunityStatus::Open,
            estimated_funding: "Not listed".into(),
            source: "IDRC - CRDI".into(),
            year: "2031".into(),
        }
    }

    #[test]
    fn csv_has_header_and_quoted_fields() {
        let bytes = to_csv(&[record()]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Title,URL,Deadline,Call For,Opportunity Status,Estimated Funding,Source,Year"
        );
        assert_eq!(
            lines.next().unwrap(),
            "\"Water, sanitation and \"\"health\"\"\",https://idrc-crdi.ca/en/funding/wash,\"May 5, 2031\",Research proposals,Open,Not listed,IDRC - CRDI,2031"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn empty_csv_still_has_header() {
        let text = String::from_utf8(to_csv(&[]).unwrap()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn json_uses_column_names_as_keys() {
        let json: serde_json::Value = serde_json::from_str(&to_json(&[record()]).unwrap()).unwrap();
        let obj = &json[0];
        assert_eq!(obj["Opportunity Status"], "Open");
        assert_eq!(obj["Call For"], "Research proposals");
        assert_eq!(obj["URL"], "https://idrc-crdi.ca/en/funding/wash");
    }

    #[tokio::test]
    async fn file_storage_writes_pair() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let paths = storage.write_records("idrc_funding", &[record()]).await.unwrap();
        assert_eq!(paths.csv, dir.path().join("idrc_funding.csv"));
        assert!(paths.csv.exists());
        let back: Vec<FundingRecord> =
            serde_json::from_str(&fs::read_to_string(&paths.json).unwrap()).unwrap();
        assert_eq!(back, vec![record()]);
    }
}
