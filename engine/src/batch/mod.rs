//! Similarity grouping, batch packing and batch execution.

mod builder;
mod executor;
mod similarity;
mod types;

pub use builder::{Batch, BatchBuilder, BatchStatus};
pub use executor::{
    BatchError, BatchExecutor, BatchResult, Categorizer, ItemResult, ProcessingStats,
    SentimentAnalyzer,
};
pub use similarity::{SimilarityGroup, SimilarityGrouper};
pub use types::{Sentiment, WorkItem};
