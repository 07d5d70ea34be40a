pub mod apis;
pub mod config;
pub mod constants;
pub mod error;
pub mod http_client;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod rate_limiter;
pub mod storage;
pub mod types;
pub mod workflow;
