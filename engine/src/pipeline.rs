//! Grouping, packing and labelling wired together.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::{
    batch::{
        BatchBuilder, BatchExecutor, BatchResult, Categorizer, ItemResult, ProcessingStats,
        SentimentAnalyzer, SimilarityGrouper, WorkItem,
    },
    engine_config::BatchConfig,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineOutput {
    /// In completion order.
    pub batches: Vec<BatchResult>,
    pub items: Vec<ItemResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batches: usize,
    pub total_emails: usize,
    pub successful: usize,
    pub errors: usize,
    pub processing_time: Duration,
    pub api_calls_saved: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[BatchResult]) -> Self {
        Self {
            batches: results.len(),
            total_emails: results.iter().map(|r| r.total_count).sum(),
            successful: results.iter().map(|r| r.success_count).sum(),
            errors: results.iter().map(|r| r.error_count).sum(),
            processing_time: results.iter().map(|r| r.processing_time).sum(),
            api_calls_saved: results.iter().map(|r| r.api_calls_saved).sum(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_emails == 0 {
            return 0.0;
        }
        self.successful as f64 * 100.0 / self.total_emails as f64
    }

    /// Share of the nominal two calls per email that were never made.
    pub fn savings_rate(&self) -> f64 {
        if self.total_emails == 0 {
            return 0.0;
        }
        self.api_calls_saved as f64 * 100.0 / (self.total_emails * 2) as f64
    }

    fn log(&self) {
        info!(
            "Batch processing summary: {} emails in {} batches, {} successful, {} errors, {:.2}s, {} API calls saved",
            self.total_emails,
            self.batches,
            self.successful,
            self.errors,
            self.processing_time.as_secs_f64(),
            self.api_calls_saved
        );
        if self.total_emails > 0 {
            info!("Success rate: {:.1}%", self.success_rate());
        }
        if self.api_calls_saved > 0 {
            info!("API call efficiency: {:.1}% savings", self.savings_rate());
        }
    }
}

pub struct TriagePipeline {
    grouper: SimilarityGrouper,
    builder: BatchBuilder,
    executor: BatchExecutor,
    analyzer: Arc<dyn SentimentAnalyzer>,
    categorizer: Arc<dyn Categorizer>,
}

impl TriagePipeline {
    pub fn new(
        config: &BatchConfig,
        default_category: &str,
        analyzer: Arc<dyn SentimentAnalyzer>,
        categorizer: Arc<dyn Categorizer>,
    ) -> Self {
        Self {
            grouper: SimilarityGrouper::new(config.similarity_threshold),
            builder: BatchBuilder::new(config.batch_size),
            executor: BatchExecutor::new(config.max_workers, default_category),
            analyzer,
            categorizer,
        }
    }

    pub async fn process(&self, items: Vec<WorkItem>) -> PipelineOutput {
        if items.is_empty() {
            return PipelineOutput::default();
        }

        info!(
            "Starting batch processing for {} emails (similarity threshold {})",
            items.len(),
            self.grouper.threshold()
        );

        let groups = self.grouper.group(items);
        let batches = self.builder.build(groups);
        info!("Created {} batches", batches.len());

        let results = self
            .executor
            .run(batches, self.analyzer.clone(), self.categorizer.clone())
            .await;
        BatchSummary::from_results(&results).log();

        let items = results
            .iter()
            .flat_map(|result| result.items.iter().cloned())
            .collect();
        PipelineOutput {
            batches: results,
            items,
        }
    }

    pub fn processing_stats(&self) -> ProcessingStats {
        self.executor.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Sentiment;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Keywords {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SentimentAnalyzer for Keywords {
        async fn analyze(&self, text: &str) -> anyhow::Result<Sentiment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("timeout") {
                return Err(anyhow!("request timed out"));
            }
            Ok(if text.contains("thanks") {
                Sentiment::Positive
            } else {
                Sentiment::Neutral
            })
        }
    }

    #[async_trait]
    impl Categorizer for Keywords {
        async fn categorize(&self, item: &WorkItem, _sentiment: Sentiment) -> anyhow::Result<String> {
            Ok(if item.subject.contains("Invoice") {
                "Invoices & Payments".to_string()
            } else {
                "General Inquiries".to_string()
            })
        }
    }

    fn pipeline(batch_size: usize, labeler: Arc<Keywords>) -> TriagePipeline {
        let config = BatchConfig {
            batch_size,
            ..Default::default()
        };
        TriagePipeline::new(&config, "General Inquiries", labeler.clone(), labeler)
    }

    #[tokio::test]
    async fn test_every_item_gets_a_result() {
        let labeler = Arc::new(Keywords::default());
        let pipeline = pipeline(2, labeler.clone());
        let invoice = WorkItem::new("1", "billing@acme.com", "Invoice 7", "Amount due: $40, thanks");
        let items = vec![
            invoice.clone(),
            WorkItem::new("2", "friend@mail.org", "Weekend", "Hiking on Saturday?"),
            WorkItem { id: "3".to_string(), ..invoice.clone() },
            WorkItem::new("4", "noc@host.net", "Ping", "timeout on api-2"),
            WorkItem { id: "5".to_string(), ..invoice },
        ];

        let output = pipeline.process(items).await;

        let mut ids: Vec<&str> = output.items.iter().map(|r| r.item.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);

        let summary = BatchSummary::from_results(&output.batches);
        assert_eq!(summary.total_emails, 5);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.successful, 4);
        // The three invoices are similar enough to share a batch and an exact group
        assert_eq!(summary.api_calls_saved, 4);
        assert_eq!(labeler.calls.load(Ordering::SeqCst), 3);

        let failed = output.items.iter().find(|r| r.item.id == "4").unwrap();
        assert_eq!(failed.category, "General Inquiries");
        assert_eq!(failed.error.as_deref(), Some("request timed out"));

        let stats = pipeline.processing_stats();
        assert_eq!(stats.total_emails_processed, 5);
        assert_eq!(stats.total_batches_processed, output.batches.len());
    }

    #[tokio::test]
    async fn test_empty_input_is_a_no_op() {
        let pipeline = pipeline(10, Arc::new(Keywords::default()));
        let output = pipeline.process(Vec::new()).await;
        assert!(output.batches.is_empty());
        assert!(output.items.is_empty());
        assert_eq!(pipeline.processing_stats(), ProcessingStats::default());
    }

    #[test]
    fn test_summary_rates() {
        let summary = BatchSummary {
            batches: 2,
            total_emails: 10,
            successful: 9,
            errors: 1,
            processing_time: Duration::from_secs(3),
            api_calls_saved: 5,
        };
        assert_eq!(summary.success_rate(), 90.0);
        assert_eq!(summary.savings_rate(), 25.0);
        assert_eq!(BatchSummary::from_results(&[]).success_rate(), 0.0);
    }
}
