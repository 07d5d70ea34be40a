pub mod grants_gov;
pub mod idrc;
pub mod nih;

use crate::config::Config;
use crate::constants::{GRANTS_GOV_SOURCE, IDRC_SOURCE, NIH_SOURCE};
use crate::http_client::HttpClient;
use crate::types::FundingSource;

pub use grants_gov::GrantsGovApi;
pub use idrc::IdrcCrawler;
pub use nih::NihReporterApi;

/// Factory function to create a funding source by CLI name
pub fn create_source(name: &str, config: &Config, client: &HttpClient) -> Option<Box<dyn FundingSource>> {
    let rpm = config.http.requests_per_min;
    match name {
        IDRC_SOURCE => Some(Box::new(IdrcCrawler::new(
            client.clone(),
            config.sources.idrc.url.clone(),
        ))),
        NIH_SOURCE => Some(Box::new(NihReporterApi::new(
            client.clone(),
            config.sources.nih.clone(),
            rpm,
        ))),
        GRANTS_GOV_SOURCE => Some(Box::new(GrantsGovApi::new(
            client.clone(),
            config.sources.grants_gov.clone(),
            rpm,
        ))),
        _ => None,
    }
}
