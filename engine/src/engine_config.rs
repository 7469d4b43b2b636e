use config::{builder::DefaultState, Config, ConfigBuilder};
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fmt,
    path::{Path, PathBuf},
    result::Result,
};
use url::Url;

use crate::{
    error::{EngineError, EngineResult},
    rate_limit::RateLimitPolicy,
};

/// Plain environment variables that override file settings.
const ENV_OVERRIDES: [(&str, &str); 8] = [
    ("huggingface.api_key", "HUGGINGFACE_API_KEY"),
    ("huggingface.model", "HF_MODEL"),
    ("huggingface.base_url", "HF_BASE_URL"),
    ("huggingface.timeout_secs", "HF_TIMEOUT"),
    ("openai.api_key", "OPENAI_API_KEY"),
    ("openai.model", "OPENAI_MODEL"),
    ("openai.base_url", "OPENAI_BASE_URL"),
    ("openai.timeout_secs", "OPENAI_TIMEOUT"),
];

pub const HUGGINGFACE_SERVICE: &str = "huggingface";
pub const OPENAI_SERVICE: &str = "openai";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub similarity_threshold: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_workers: 3,
            similarity_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub ttl_secs: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            ttl_secs: HashMap::from([
                ("sentiment".to_string(), 3600),
                ("categorization".to_string(), 1800),
            ]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HuggingFaceConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "distilbert-base-uncased-finetuned-sst-2-english".to_string(),
            base_url: "https://api-inference.huggingface.co/models".to_string(),
            timeout_secs: 15,
        }
    }
}

impl HuggingFaceConfig {
    pub fn endpoint(&self) -> EngineResult<Url> {
        join_endpoint(&self.base_url, &self.model)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub temperature: f64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 15,
            temperature: 0.1,
        }
    }
}

impl OpenAiConfig {
    pub fn endpoint(&self) -> EngineResult<Url> {
        join_endpoint(&self.base_url, "chat/completions")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub labels: Vec<String>,
    pub default_label: String,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        let labels = [
            "Client Communication",
            "Client_Communication",
            "Completed & Archived",
            "Follow-Up Required",
            "General Inquiries",
            "Invoices & Payments",
            "Marketing & Promotions",
            "Pending & To Be Actioned",
            "Personal & Non-Business",
            "Reports & Documents",
            "Spam & Unwanted",
            "System & Notifications",
            "Urgent & Time-Sensitive",
        ];
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            default_label: "General Inquiries".to_string(),
        }
    }
}

impl CategoryConfig {
    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub error_rate_pct: f64,
    pub cache_hit_rate_pct: f64,
    pub rate_limit_rate_pct: f64,
    pub daily_usage: HashMap<String, u64>,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate_pct: 10.0,
            cache_hit_rate_pct: 50.0,
            rate_limit_rate_pct: 5.0,
            daily_usage: HashMap::from([
                (HUGGINGFACE_SERVICE.to_string(), 8000),
                (OPENAI_SERVICE.to_string(), 4000),
            ]),
        }
    }
}

pub fn default_rate_limits() -> HashMap<String, RateLimitPolicy> {
    HashMap::from([
        (
            HUGGINGFACE_SERVICE.to_string(),
            RateLimitPolicy {
                requests_per_minute: 30,
                requests_per_hour: 1000,
                requests_per_day: 10000,
                burst_size: 5,
            },
        ),
        (
            OPENAI_SERVICE.to_string(),
            RateLimitPolicy {
                requests_per_minute: 20,
                requests_per_hour: 500,
                requests_per_day: 5000,
                burst_size: 3,
            },
        ),
    ])
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub rate_limits: HashMap<String, RateLimitPolicy>,
    pub huggingface: HuggingFaceConfig,
    pub openai: OpenAiConfig,
    pub categories: CategoryConfig,
    pub alerts: AlertThresholds,
    /// JSON-lines file that receives a usage snapshot after each run.
    pub usage_log: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            rate_limits: default_rate_limits(),
            huggingface: HuggingFaceConfig::default(),
            openai: OpenAiConfig::default(),
            categories: CategoryConfig::default(),
            alerts: AlertThresholds::default(),
            usage_log: None,
        }
    }
}

impl EngineConfig {
    /// Load defaults, then `path` if it exists, then `TRIAGE__*` variables,
    /// then the plain provider variables (`OPENAI_API_KEY`, ...).
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("TRIAGE")
                .separator("__")
                .try_parsing(true),
        );
        for (key, var) in ENV_OVERRIDES {
            builder = builder.set_override_option(key, env::var(var).ok())?;
        }

        Self::from_builder(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> EngineResult<Self> {
        let cfg: EngineConfig = builder.build()?.try_deserialize()?;
        Ok(cfg.with_default_services())
    }

    /// Services missing from a configured `rate_limits` table keep their defaults.
    fn with_default_services(mut self) -> Self {
        for (service, policy) in default_rate_limits() {
            self.rate_limits.entry(service).or_insert(policy);
        }
        self
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut services: Vec<_> = self.rate_limits.iter().collect();
        services.sort_by(|a, b| a.0.cmp(b.0));
        write!(
            f,
            "Engine Config:\nBatch: {:?}\nRetry: {:?}\nCache: {:?}\n\nRate Limits:\n{}\n\nHugging Face: model={} timeout={}s key_set={}\nOpenAI: model={} timeout={}s key_set={}\n\nCategories: {} (default {})",
            self.batch,
            self.retry,
            self.cache,
            services
                .iter()
                .map(|(name, p)| format!(
                    "{} -> {}/min {}/h {}/day burst {}",
                    name, p.requests_per_minute, p.requests_per_hour, p.requests_per_day, p.burst_size
                ))
                .collect::<Vec<_>>()
                .join("\n"),
            self.huggingface.model,
            self.huggingface.timeout_secs,
            !self.huggingface.api_key.is_empty(),
            self.openai.model,
            self.openai.timeout_secs,
            !self.openai.api_key.is_empty(),
            self.categories.labels.len(),
            self.categories.default_label,
        )
    }
}

fn join_endpoint(base_url: &str, path: &str) -> Result<Url, EngineError> {
    let joined = format!("{}/{}", base_url.trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| {
        EngineError::Config(config::ConfigError::Message(format!(
            "invalid endpoint {joined}: {e}"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const SAMPLE: &str = r#"
        usage_log = "usage.jsonl"

        [batch]
        batch_size = 25

        [cache.ttl_secs]
        sentiment = 60

        [rate_limits.huggingface]
        requests_per_minute = 2
        requests_per_hour = 100
        requests_per_day = 1000
        burst_size = 1

        [openai]
        model = "gpt-4o-mini"
    "#;

    #[test]
    fn test_default_rate_limits() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.batch.batch_size, 10);
        assert_eq!(cfg.batch.max_workers, 3);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.rate_limits[OPENAI_SERVICE].requests_per_minute, 20);
        assert_eq!(cfg.rate_limits[HUGGINGFACE_SERVICE].requests_per_day, 10000);
        assert_eq!(cfg.categories.labels.len(), 13);
        assert!(cfg.categories.contains("General Inquiries"));
        assert!(cfg.usage_log.is_none());
    }

    #[test]
    fn test_file_values_override_defaults() {
        let builder = Config::builder().add_source(config::File::from_str(SAMPLE, FileFormat::Toml));
        let cfg = EngineConfig::from_builder(builder).unwrap();

        assert_eq!(cfg.batch.batch_size, 25);
        assert_eq!(cfg.batch.max_workers, 3);
        assert_eq!(cfg.cache.ttl_secs["sentiment"], 60);
        assert_eq!(cfg.rate_limits[HUGGINGFACE_SERVICE].requests_per_minute, 2);
        // Not listed in the file, so the default policy is kept
        assert_eq!(cfg.rate_limits[OPENAI_SERVICE].requests_per_minute, 20);
        assert_eq!(cfg.openai.model, "gpt-4o-mini");
        assert_eq!(cfg.openai.timeout_secs, 15);
        assert_eq!(cfg.usage_log, Some(PathBuf::from("usage.jsonl")));
    }

    #[test]
    fn test_endpoints() {
        let cfg = EngineConfig::default();
        assert_eq!(
            cfg.huggingface.endpoint().unwrap().as_str(),
            "https://api-inference.huggingface.co/models/distilbert-base-uncased-finetuned-sst-2-english"
        );
        assert_eq!(
            cfg.openai.endpoint().unwrap().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_display_hides_api_keys() {
        let mut cfg = EngineConfig::default();
        cfg.openai.api_key = "sk-secret".to_string();
        let rendered = cfg.to_string();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("key_set=true"));
    }
}
