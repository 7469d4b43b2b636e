use chrono::{DateTime, Utc};
use lib_utils::hashing::short_hash;
use serde::Serialize;
use strum::Display;

use super::{similarity::SimilarityGroup, types::WorkItem};

const BATCH_ID_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    /// `pending -> processing -> completed | failed`, never backwards.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Pending, BatchStatus::Processing)
                | (BatchStatus::Processing, BatchStatus::Completed)
                | (BatchStatus::Processing, BatchStatus::Failed)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub id: String,
    pub items: Vec<WorkItem>,
    pub created_at: DateTime<Utc>,
    status: BatchStatus,
}

impl Batch {
    pub fn new(id: String, items: Vec<WorkItem>) -> Self {
        Self {
            id,
            items,
            created_at: Utc::now(),
            status: BatchStatus::Pending,
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    /// Returns false and leaves the status alone for an illegal transition.
    pub fn transition(&mut self, next: BatchStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                "Ignoring batch {} transition {} -> {}",
                self.id,
                self.status,
                next
            );
            return false;
        }
        self.status = next;
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Packs similarity groups into batches of at most `max_batch_size` items.
#[derive(Debug, Clone, Copy)]
pub struct BatchBuilder {
    max_batch_size: usize,
}

impl BatchBuilder {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Groups are never split. A group larger than the cap gets a batch of
    /// its own.
    pub fn build(&self, groups: Vec<SimilarityGroup>) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut current: Vec<WorkItem> = Vec::new();

        for group in groups {
            if !current.is_empty() && current.len() + group.len() > self.max_batch_size {
                batches.push(self.close(&mut current, batches.len()));
            }

            current.extend(group);

            if current.len() >= self.max_batch_size {
                batches.push(self.close(&mut current, batches.len()));
            }
        }

        if !current.is_empty() {
            batches.push(self.close(&mut current, batches.len()));
        }

        batches
    }

    fn close(&self, current: &mut Vec<WorkItem>, index: usize) -> Batch {
        // Several batches are created within the same instant, so the index
        // is mixed into the hash
        let seed = format!("{}#{}", Utc::now().to_rfc3339(), index);
        Batch::new(short_hash(&seed, BATCH_ID_LEN), std::mem::take(current))
    }
}
