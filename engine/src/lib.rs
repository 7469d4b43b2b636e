pub mod backoff;
pub mod batch;
pub mod cache;
pub mod engine_config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod prompt;
pub mod rate_limit;
pub mod throttle;
pub mod upstream;

pub type HttpClient = reqwest::Client;
