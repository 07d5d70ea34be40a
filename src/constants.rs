/// Source name constants to ensure consistency across the codebase.
/// These are the names accepted on the CLI and in `workflow.sources`.
pub const IDRC_SOURCE: &str = "idrc";
pub const NIH_SOURCE: &str = "nih";
pub const GRANTS_GOV_SOURCE: &str = "grants_gov";

// Output file stems, one `.csv` + `.json` pair per source
pub const IDRC_FILE_STEM: &str = "idrc_funding";
pub const NIH_FILE_STEM: &str = "nih_funding";
pub const GRANTS_GOV_FILE_STEM: &str = "grantsgov_funding";
pub const COMBINED_FILE_STEM: &str = "combined_funding_opportunities";

// Display names written into the `Source` column
pub const IDRC_SOURCE_LABEL: &str = "IDRC - CRDI";
pub const NIH_SOURCE_LABEL: &str = "NIH RePORTER";
pub const GRANTS_GOV_SOURCE_LABEL: &str = "Grants.gov";

pub const IDRC_BASE_URL: &str = "https://idrc-crdi.ca";
pub const IDRC_FUNDING_URL: &str = "https://idrc-crdi.ca/en/funding";
pub const NIH_SEARCH_URL: &str = "https://api.reporter.nih.gov/v2/projects/search";
pub const NIH_PROJECT_URL: &str = "https://reporter.nih.gov/project-details";
pub const GRANTS_GOV_SEARCH_URL: &str = "https://api.grants.gov/v1/api/search2";
pub const GRANTS_GOV_DETAIL_URL: &str = "https://www.grants.gov/search-results-detail";

// Placeholder values used when a field is absent
pub const NOT_AVAILABLE: &str = "N/A";
pub const NOT_SPECIFIED: &str = "Not specified";
pub const NOT_LISTED: &str = "Not listed";

/// Get all supported source names
pub fn get_supported_sources() -> Vec<&'static str> {
    vec![IDRC_SOURCE, NIH_SOURCE, GRANTS_GOV_SOURCE]
}
