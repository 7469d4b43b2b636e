//! Bounded worker pool that labels batches.
//!
//! Each batch runs in its own task and is processed sequentially. Inside a
//! batch, items sharing `sender|subject|body prefix` are labelled once through
//! a representative. Failures are contained per exact group, then per batch.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::{sync::Semaphore, task::JoinSet, time::Instant};
use tracing::{debug, error, info};

use super::{
    builder::{Batch, BatchStatus},
    types::{Sentiment, WorkItem},
};

#[async_trait]
pub trait SentimentAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> anyhow::Result<Sentiment>;
}

#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(&self, item: &WorkItem, sentiment: Sentiment) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    pub batch_id: String,
    pub item: WorkItem,
    pub sentiment: Sentiment,
    pub category: String,
    /// Labels were copied from the exact group's representative.
    pub shared_result: bool,
    /// Time since the batch started.
    pub processing_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchError {
    pub item_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub error: String,
}

impl BatchError {
    fn for_item(item: &WorkItem, error: &str) -> Self {
        Self {
            item_id: Some(item.id.clone()),
            subject: item.subject.clone(),
            sender: item.sender.clone(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub status: BatchStatus,
    pub success_count: usize,
    pub error_count: usize,
    pub total_count: usize,
    pub processing_time: Duration,
    pub api_calls_saved: usize,
    pub errors: Vec<BatchError>,
    pub items: Vec<ItemResult>,
}

impl BatchResult {
    /// The task running the batch died before producing a result.
    fn lost(batch_id: String, total_count: usize, error: String) -> Self {
        Self {
            batch_id,
            status: BatchStatus::Failed,
            success_count: 0,
            error_count: total_count,
            total_count,
            processing_time: Duration::ZERO,
            api_calls_saved: 0,
            errors: vec![BatchError {
                item_id: None,
                subject: "Batch Error".to_string(),
                sender: "System".to_string(),
                error,
            }],
            items: Vec::new(),
        }
    }
}

/// Cumulative statistics over every `run`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub total_emails_processed: usize,
    pub total_batches_processed: usize,
    pub total_api_calls_saved: usize,
    pub total_processing_time: Duration,
    pub average_batch_size: f64,
}

impl ProcessingStats {
    fn record(&mut self, results: &[BatchResult]) {
        for result in results {
            self.total_emails_processed += result.total_count;
            self.total_api_calls_saved += result.api_calls_saved;
            self.total_processing_time += result.processing_time;
        }
        self.total_batches_processed += results.len();

        if self.total_batches_processed > 0 {
            self.average_batch_size =
                self.total_emails_processed as f64 / self.total_batches_processed as f64;
        }
    }
}

/// Per-batch state that survives a batch-fatal failure.
struct BatchProgress {
    results: Vec<Option<ItemResult>>,
    errors: Vec<BatchError>,
    api_calls_saved: usize,
}

pub struct BatchExecutor {
    max_workers: usize,
    default_category: String,
    stats: Mutex<ProcessingStats>,
}

impl BatchExecutor {
    pub fn new(max_workers: usize, default_category: impl Into<String>) -> Self {
        Self {
            max_workers: max_workers.max(1),
            default_category: default_category.into(),
            stats: Mutex::new(ProcessingStats::default()),
        }
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats.lock().unwrap().clone()
    }

    /// Process every batch on at most `max_workers` concurrent tasks.
    ///
    /// Results are returned in completion order.
    pub async fn run(
        &self,
        batches: Vec<Batch>,
        analyzer: Arc<dyn SentimentAnalyzer>,
        categorizer: Arc<dyn Categorizer>,
    ) -> Vec<BatchResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        let mut submitted = HashMap::new();

        for batch in batches {
            let semaphore = semaphore.clone();
            let analyzer = analyzer.clone();
            let categorizer = categorizer.clone();
            let default_category = self.default_category.clone();
            let meta = (batch.id.clone(), batch.len());

            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                process_batch(
                    batch,
                    analyzer.as_ref(),
                    categorizer.as_ref(),
                    &default_category,
                )
                .await
            });
            submitted.insert(handle.id(), meta);
        }

        let mut results = Vec::with_capacity(submitted.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, result)) => results.push(result),
                Err(err) => {
                    let (batch_id, total) = submitted.remove(&err.id()).unwrap_or_default();
                    error!("Batch {} failed with exception: {}", batch_id, err);
                    results.push(BatchResult::lost(batch_id, total, err.to_string()));
                }
            }
        }

        self.stats.lock().unwrap().record(&results);
        results
    }
}

async fn process_batch(
    mut batch: Batch,
    analyzer: &dyn SentimentAnalyzer,
    categorizer: &dyn Categorizer,
    default_category: &str,
) -> BatchResult {
    let start = Instant::now();
    batch.transition(BatchStatus::Processing);
    info!("Processing batch {} ({} emails)", batch.id, batch.len());

    let mut progress = BatchProgress {
        results: vec![None; batch.len()],
        errors: Vec::new(),
        api_calls_saved: 0,
    };

    let outcome = AssertUnwindSafe(label_groups(
        &batch,
        analyzer,
        categorizer,
        default_category,
        start,
        &mut progress,
    ))
    .catch_unwind()
    .await;

    match outcome {
        Ok(()) => {
            batch.transition(BatchStatus::Completed);
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "Unknown panic".to_string());
            error!("Batch {} failed: {}", batch.id, msg);
            batch.transition(BatchStatus::Failed);
            fail_batch(&batch, default_category, start, &msg, &mut progress);
        }
    }

    let total_count = batch.len();
    let error_count = progress.errors.len();
    let status = batch.status();
    BatchResult {
        batch_id: batch.id,
        status,
        success_count: total_count.saturating_sub(error_count),
        error_count,
        total_count,
        processing_time: start.elapsed(),
        api_calls_saved: progress.api_calls_saved,
        errors: progress.errors,
        items: progress.results.into_iter().flatten().collect(),
    }
}

/// Exact groups as index lists, in order of first appearance.
fn exact_groups(items: &[WorkItem]) -> IndexMap<String, Vec<usize>> {
    let mut groups: IndexMap<String, Vec<usize>> = IndexMap::new();
    for (idx, item) in items.iter().enumerate() {
        groups.entry(item.exact_match_key()).or_default().push(idx);
    }
    groups
}

async fn label_groups(
    batch: &Batch,
    analyzer: &dyn SentimentAnalyzer,
    categorizer: &dyn Categorizer,
    default_category: &str,
    start: Instant,
    progress: &mut BatchProgress,
) {
    for members in exact_groups(&batch.items).into_values() {
        // Every duplicate skips one sentiment and one categorize call
        progress.api_calls_saved += (members.len() - 1) * 2;

        let representative = &batch.items[members[0]];
        let labels = async {
            let sentiment = analyzer.analyze(representative.sentiment_text()).await?;
            let category = categorizer.categorize(representative, sentiment).await?;
            anyhow::Ok((sentiment, category))
        }
        .await;

        match labels {
            Ok((sentiment, category)) => {
                for (pos, &idx) in members.iter().enumerate() {
                    progress.results[idx] = Some(ItemResult {
                        batch_id: batch.id.clone(),
                        item: batch.items[idx].clone(),
                        sentiment,
                        category: category.clone(),
                        shared_result: pos > 0,
                        processing_time: start.elapsed(),
                        error: None,
                    });
                }
                debug!(
                    "Processed {} similar email(s) -> {}",
                    members.len(),
                    category
                );
            }
            Err(err) => {
                let msg = err.to_string();
                error!("Error processing email group: {:?}", err);
                for &idx in &members {
                    let item = &batch.items[idx];
                    progress.errors.push(BatchError::for_item(item, &msg));
                    progress.results[idx] = Some(fallback(
                        batch,
                        item,
                        default_category,
                        start,
                        &msg,
                    ));
                }
            }
        }
    }
}

/// Annotate every item with the batch error. Items that were never labelled
/// get the fallback labels.
fn fail_batch(
    batch: &Batch,
    default_category: &str,
    start: Instant,
    msg: &str,
    progress: &mut BatchProgress,
) {
    progress.errors = batch
        .items
        .iter()
        .map(|item| BatchError::for_item(item, msg))
        .collect();

    for (idx, item) in batch.items.iter().enumerate() {
        match progress.results[idx].as_mut() {
            Some(result) => result.error = Some(msg.to_string()),
            None => {
                progress.results[idx] = Some(fallback(batch, item, default_category, start, msg))
            }
        }
    }
}

fn fallback(
    batch: &Batch,
    item: &WorkItem,
    default_category: &str,
    start: Instant,
    msg: &str,
) -> ItemResult {
    ItemResult {
        batch_id: batch.id.clone(),
        item: item.clone(),
        sentiment: Sentiment::Neutral,
        category: default_category.to_string(),
        shared_result: false,
        processing_time: start.elapsed(),
        error: Some(msg.to_string()),
    }
}
