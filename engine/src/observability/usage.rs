use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use strum::Display;
use tracing::warn;

use crate::{
    engine_config::AlertThresholds,
    error::EngineResult,
    throttle::{UsageCounters, UsageSnapshot},
};

use super::common::format_table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighErrorRate,
    LowCacheHitRate,
    HighRateLimit,
    HighDailyUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageAlert {
    pub kind: AlertKind,
    pub service: String,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

pub struct UsageMonitor {
    thresholds: AlertThresholds,
}

impl UsageMonitor {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    /// Alerts for every service that has made at least one request.
    pub fn check_alerts(&self, snapshot: &UsageSnapshot) -> Vec<UsageAlert> {
        let mut alerts = Vec::new();

        for (service, usage) in &snapshot.services {
            let counters = &usage.counters;
            if counters.total_requests == 0 {
                continue;
            }

            let error_rate = counters.error_rate();
            if error_rate > self.thresholds.error_rate_pct {
                alerts.push(UsageAlert {
                    kind: AlertKind::HighErrorRate,
                    service: service.clone(),
                    value: error_rate,
                    threshold: self.thresholds.error_rate_pct,
                    message: format!("High error rate for {}: {:.1}%", service, error_rate),
                });
            }

            if usage.cache_hit_rate < self.thresholds.cache_hit_rate_pct {
                alerts.push(UsageAlert {
                    kind: AlertKind::LowCacheHitRate,
                    service: service.clone(),
                    value: usage.cache_hit_rate,
                    threshold: self.thresholds.cache_hit_rate_pct,
                    message: format!(
                        "Low cache hit rate for {}: {:.1}%",
                        service, usage.cache_hit_rate
                    ),
                });
            }

            let rate_limited = counters.rate_limited_rate();
            if rate_limited > self.thresholds.rate_limit_rate_pct {
                alerts.push(UsageAlert {
                    kind: AlertKind::HighRateLimit,
                    service: service.clone(),
                    value: rate_limited,
                    threshold: self.thresholds.rate_limit_rate_pct,
                    message: format!("High rate limit rate for {}: {:.1}%", service, rate_limited),
                });
            }

            if let Some(&limit) = self.thresholds.daily_usage.get(service) {
                if counters.total_requests > limit {
                    alerts.push(UsageAlert {
                        kind: AlertKind::HighDailyUsage,
                        service: service.clone(),
                        value: counters.total_requests as f64,
                        threshold: limit as f64,
                        message: format!(
                            "High daily usage for {}: {} requests",
                            service, counters.total_requests
                        ),
                    });
                }
            }
        }

        alerts
    }

    pub fn log_alerts(&self, alerts: &[UsageAlert]) {
        for alert in alerts {
            warn!("API usage alert [{}]: {}", alert.kind, alert.message);
        }
    }
}

fn report_row(name: &str, counters: &UsageCounters) -> Vec<String> {
    vec![
        name.to_string(),
        counters.total_requests.to_string(),
        counters.cached_responses.to_string(),
        counters.rate_limited.to_string(),
        counters.errors.to_string(),
        format!("{:.1}%", counters.cache_hit_rate()),
        format!("{:.1}%", counters.error_rate()),
        counters
            .last_request
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string()),
    ]
}

/// Per-service table with a totals row.
pub fn usage_report(snapshot: &UsageSnapshot) -> String {
    let headers = [
        "Service",
        "Requests",
        "Cached",
        "Rate Limited",
        "Errors",
        "Hit Rate",
        "Error Rate",
        "Last Request",
    ];

    let mut totals = UsageCounters::default();
    let mut rows: Vec<Vec<String>> = Vec::new();
    for (name, usage) in &snapshot.services {
        let counters = &usage.counters;
        totals.total_requests += counters.total_requests;
        totals.cached_responses += counters.cached_responses;
        totals.rate_limited += counters.rate_limited;
        totals.errors += counters.errors;
        totals.last_request = totals.last_request.max(counters.last_request);
        rows.push(report_row(name, counters));
    }
    if rows.is_empty() {
        return String::new();
    }
    rows.push(report_row("TOTAL", &totals));

    let title = format!("API Usage Report ({} cached items)", snapshot.cache_size);
    format_table(&title, &headers, &rows)
}

/// Append `{"timestamp", "stats"}` as one JSON line.
pub fn append_usage_log(path: &Path, snapshot: &UsageSnapshot) -> EngineResult<()> {
    let entry = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "stats": snapshot,
    });

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(&entry)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::ServiceUsage;
    use std::collections::BTreeMap;

    fn snapshot(entries: &[(&str, UsageCounters)]) -> UsageSnapshot {
        let services = entries
            .iter()
            .map(|(name, counters)| {
                (
                    name.to_string(),
                    ServiceUsage {
                        counters: counters.clone(),
                        cache_hit_rate: counters.cache_hit_rate(),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        UsageSnapshot {
            services,
            cache_size: 4,
        }
    }

    fn kinds(alerts: &[UsageAlert]) -> Vec<AlertKind> {
        alerts.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_healthy_service_raises_nothing() {
        let monitor = UsageMonitor::new(AlertThresholds::default());
        let healthy = UsageCounters {
            total_requests: 100,
            cached_responses: 80,
            rate_limited: 2,
            errors: 1,
            last_request: None,
        };
        assert!(monitor.check_alerts(&snapshot(&[("openai", healthy)])).is_empty());
    }

    #[test]
    fn test_each_threshold_fires() {
        let monitor = UsageMonitor::new(AlertThresholds::default());
        let busy = UsageCounters {
            total_requests: 4001,
            cached_responses: 100,
            rate_limited: 400,
            errors: 800,
            last_request: None,
        };

        let alerts = monitor.check_alerts(&snapshot(&[("openai", busy)]));
        assert_eq!(
            kinds(&alerts),
            vec![
                AlertKind::HighErrorRate,
                AlertKind::LowCacheHitRate,
                AlertKind::HighRateLimit,
                AlertKind::HighDailyUsage,
            ]
        );
        assert_eq!(alerts[3].threshold, 4000.0);
        assert_eq!(alerts[3].message, "High daily usage for openai: 4001 requests");
    }

    #[test]
    fn test_idle_service_is_skipped() {
        let monitor = UsageMonitor::new(AlertThresholds::default());
        let idle = UsageCounters {
            cached_responses: 3,
            ..Default::default()
        };
        assert!(monitor.check_alerts(&snapshot(&[("huggingface", idle)])).is_empty());
    }

    #[test]
    fn test_daily_usage_only_for_configured_services() {
        let monitor = UsageMonitor::new(AlertThresholds::default());
        let counters = UsageCounters {
            total_requests: 50_000,
            cached_responses: 50_000,
            ..Default::default()
        };
        assert!(monitor.check_alerts(&snapshot(&[("translate", counters)])).is_empty());
    }

    #[test]
    fn test_report_includes_totals() {
        let a = UsageCounters {
            total_requests: 10,
            cached_responses: 5,
            ..Default::default()
        };
        let b = UsageCounters {
            total_requests: 30,
            errors: 3,
            ..Default::default()
        };
        let report = usage_report(&snapshot(&[("huggingface", a), ("openai", b)]));

        assert!(report.contains("API Usage Report (4 cached items)"));
        let total = report.lines().find(|l| l.starts_with("| TOTAL")).unwrap();
        assert!(total.contains("| 40 "));
        assert!(total.contains("12.5%"));
        assert!(total.contains("7.5%"));
        assert_eq!(usage_report(&snapshot(&[])), "");
    }

    #[test]
    fn test_usage_log_appends_json_lines() {
        let path = std::env::temp_dir().join(format!("usage-log-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let snap = snapshot(&[("openai", UsageCounters::default())]);

        append_usage_log(&path, &snap).unwrap();
        append_usage_log(&path, &snap).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let entry: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry["stats"]["cache_size"], 4);
        assert_eq!(entry["stats"]["services"]["openai"]["total_requests"], 0);
        assert!(entry["timestamp"].is_string());
        std::fs::remove_file(&path).unwrap();
    }
}
