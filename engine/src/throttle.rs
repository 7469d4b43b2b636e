//! Single call path to quota-limited services.
//!
//! `cache check -> admission wait -> record -> execute -> cache write`. The
//! first three steps share one exclusive section; the lock is released while
//! the request runs and taken again to store the result.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    backoff::BackoffExecutor,
    cache::{CacheKey, ResponseCache},
    engine_config::EngineConfig,
    error::EngineResult,
    rate_limit::{RateLimitPolicy, RateLimitTracker},
    upstream::UpstreamOutcome,
};

#[derive(Debug, Clone)]
pub struct ApiResponse<V> {
    pub data: V,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
    pub cache_key: CacheKey,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageCounters {
    pub total_requests: u64,
    pub cached_responses: u64,
    pub rate_limited: u64,
    pub errors: u64,
    pub last_request: Option<DateTime<Utc>>,
}

impl UsageCounters {
    /// `cached / total * 100`, zero before the first request.
    pub fn cache_hit_rate(&self) -> f64 {
        percentage(self.cached_responses, self.total_requests)
    }

    pub fn error_rate(&self) -> f64 {
        percentage(self.errors, self.total_requests)
    }

    pub fn rate_limited_rate(&self) -> f64 {
        percentage(self.rate_limited, self.total_requests)
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceUsage {
    #[serde(flatten)]
    pub counters: UsageCounters,
    pub cache_hit_rate: f64,
}

/// Point-in-time copy of the usage counters, for reporting and alerting.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub services: BTreeMap<String, ServiceUsage>,
    pub cache_size: usize,
}

struct ThrottleState<V> {
    limiter: RateLimitTracker,
    cache: ResponseCache<V>,
    usage: HashMap<String, UsageCounters>,
}

impl<V> ThrottleState<V> {
    fn usage_mut(&mut self, service: &str) -> &mut UsageCounters {
        self.usage.entry(service.to_string()).or_default()
    }
}

pub struct ThrottledCaller<V> {
    state: Mutex<ThrottleState<V>>,
    backoff: BackoffExecutor,
}

impl<V> ThrottledCaller<V>
where
    V: UpstreamOutcome + Clone,
{
    pub fn new(limiter: RateLimitTracker, cache: ResponseCache<V>, backoff: BackoffExecutor) -> Self {
        Self {
            state: Mutex::new(ThrottleState {
                limiter,
                cache,
                usage: HashMap::new(),
            }),
            backoff,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            RateLimitTracker::new(config.rate_limits.clone()),
            ResponseCache::from_config(&config.cache),
            BackoffExecutor::new(config.retry.max_attempts),
        )
    }

    /// Run `request` for `service` unless `(operation, content)` is cached.
    ///
    /// Two concurrent callers missing on the same key both run their request
    /// and both write the cache; the later write wins.
    pub async fn call<F, Fut>(
        &self,
        service: &str,
        operation: &str,
        content: &str,
        request: F,
    ) -> EngineResult<ApiResponse<V>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let cache_key = CacheKey::new(operation, content);

        {
            let mut state = self.state.lock().await;

            if let Some(data) = state.cache.get(&cache_key, operation) {
                state.usage_mut(service).cached_responses += 1;
                debug!("Cache hit for {} ({})", operation, service);
                return Ok(ApiResponse {
                    data,
                    cached: true,
                    timestamp: Utc::now(),
                    cache_key,
                });
            }

            state.limiter.prune(service);
            if let Some(admission) = state.limiter.check(service) {
                state.usage_mut(service).rate_limited += 1;
                warn!(
                    "Rate limit reached for {} ({} window), waiting {:.1}s",
                    service,
                    admission.window,
                    admission.wait.as_secs_f64()
                );
                tokio::time::sleep(admission.wait).await;
            }

            state.limiter.record(service);
            let usage = state.usage_mut(service);
            usage.total_requests += 1;
            usage.last_request = Some(Utc::now());
        }

        let data = match self.backoff.execute(request).await {
            Ok(data) => data,
            Err(err) => {
                self.state.lock().await.usage_mut(service).errors += 1;
                return Err(err);
            }
        };

        self.state
            .lock()
            .await
            .cache
            .put(cache_key.clone(), data.clone());

        Ok(ApiResponse {
            data,
            cached: false,
            timestamp: Utc::now(),
            cache_key,
        })
    }

    pub async fn update_rate_limit(&self, service: &str, policy: RateLimitPolicy) {
        self.state.lock().await.limiter.set_policy(service, policy);
    }

    /// Returns the number of entries removed.
    pub async fn clear_cache(&self, operation: Option<&str>) -> usize {
        self.state.lock().await.cache.clear(operation)
    }

    pub async fn cache_len(&self) -> usize {
        self.state.lock().await.cache.len()
    }

    pub async fn usage_snapshot(&self) -> UsageSnapshot {
        let state = self.state.lock().await;
        let services = state
            .usage
            .iter()
            .map(|(name, counters)| {
                (
                    name.clone(),
                    ServiceUsage {
                        counters: counters.clone(),
                        cache_hit_rate: counters.cache_hit_rate(),
                    },
                )
            })
            .collect();

        UsageSnapshot {
            services,
            cache_size: state.cache.len(),
        }
    }

    pub async fn reset_usage(&self) {
        self.state.lock().await.usage.clear();
    }
}
