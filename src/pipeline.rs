use crate::constants::COMBINED_FILE_STEM;
use crate::error::Result;
use crate::storage::{ArtifactPaths, Storage};
use crate::types::{FundingRecord, FundingSource};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Result of running one source through the pipeline
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub source_name: String,
    pub total_records: usize,
    pub errors: Vec<String>,
    pub csv_file: Option<String>,
    pub json_file: Option<String>,
}

/// Summary of a multi-source run, including the combined artifact when written
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub sources: Vec<PipelineResult>,
    pub combined_records: Option<usize>,
}

pub struct Pipeline;

impl Pipeline {
    /// Fetch one source and persist its artifact pair.
    #[instrument(skip(source, storage), fields(source_name = %source.source_name()))]
    pub async fn run_source(
        source: &dyn FundingSource,
        storage: &dyn Storage,
    ) -> Result<(PipelineResult, Vec<FundingRecord>)> {
        let source_name = source.source_name().to_string();
        info!("🚀 Starting pipeline for {}", source_name);
        counter!("funding_pipeline_runs_total", "source" => source_name.clone()).increment(1);

        let t_fetch = std::time::Instant::now();
        let records = source.fetch_records().await?;
        histogram!("funding_fetch_duration_seconds", "source" => source_name.clone())
            .record(t_fetch.elapsed().as_secs_f64());
        counter!("funding_records_total", "source" => source_name.clone())
            .increment(records.len() as u64);
        info!("✅ Fetched {} records from {}", records.len(), source_name);

        let ArtifactPaths { csv, json } = storage.write_records(source.file_stem(), &records).await?;
        info!("💾 Saved {} and {}", csv.display(), json.display());

        Ok((
            PipelineResult {
                source_name,
                total_records: records.len(),
                errors: Vec::new(),
                csv_file: Some(csv.to_string_lossy().to_string()),
                json_file: Some(json.to_string_lossy().to_string()),
            },
            records,
        ))
    }

    /// Run every source in order. A failing source is recorded and skipped;
    /// the combined artifact is written when more than one source ran.
    pub async fn run_all(
        sources: Vec<Box<dyn FundingSource>>,
        storage: Arc<dyn Storage>,
    ) -> Result<RunSummary> {
        let multi = sources.len() > 1;
        let mut results = Vec::with_capacity(sources.len());
        let mut all_records = Vec::new();

        for source in sources {
            match Self::run_source(source.as_ref(), storage.as_ref()).await {
                Ok((result, records)) => {
                    all_records.extend(records);
                    results.push(result);
                }
                Err(e) => {
                    error!("Pipeline failed for {}: {}", source.source_name(), e);
                    counter!("funding_source_errors_total", "source" => source.source_name())
                        .increment(1);
                    results.push(PipelineResult {
                        source_name: source.source_name().to_string(),
                        total_records: 0,
                        errors: vec![e.to_string()],
                        csv_file: None,
                        json_file: None,
                    });
                }
            }
        }

        let combined_records = if multi {
            let combined = combine_records(all_records);
            storage.write_records(COMBINED_FILE_STEM, &combined).await?;
            info!("✅ Saved {} unique funding opportunities", combined.len());
            Some(combined.len())
        } else {
            None
        };

        Ok(RunSummary {
            sources: results,
            combined_records,
        })
    }
}

/// Deduplicate by `(lowercase title, source)`. A later duplicate replaces the
/// earlier value but keeps the earlier position.
pub fn combine_records(records: Vec<FundingRecord>) -> Vec<FundingRecord> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut unique: Vec<FundingRecord> = Vec::new();

    for record in records {
        match index.get(&record.dedupe_key()) {
            Some(&pos) => unique[pos] = record,
            None => {
                index.insert(record.dedupe_key(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}
