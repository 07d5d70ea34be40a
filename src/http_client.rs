use crate::config::HttpConfig;
use crate::error::{Result, ScraperError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Thin wrapper over a shared `reqwest::Client` carrying the configured
/// timeout and user agent. Non-success statuses become `ScraperError::Api`.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()?;
        Ok(Self { client })
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScraperError::Api {
                message: format!("GET {} failed with status {}", url, status),
            });
        }
        Ok(resp.text().await?)
    }

    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("POST {}", url);
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScraperError::Api {
                message: format!("POST {} failed with status {}", url, status),
            });
        }
        Ok(resp.json::<T>().await?)
    }
}
