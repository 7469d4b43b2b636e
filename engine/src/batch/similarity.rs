//! Near-duplicate grouping of work items.
//!
//! Groups are formed by a single pass: the first unclaimed item anchors a
//! group and every later unclaimed item is scored against that anchor only.
//! Membership is not transitive.

use std::sync::LazyLock;

use lib_utils::{similarity::sequence_ratio, text::truncate_chars};
use regex::Regex;

use super::types::WorkItem;

pub type SimilarityGroup = Vec<WorkItem>;

const BODY_CHARS: usize = 200;
const SENDER_BOOST: f64 = 0.1;
const SUBJECT_BOOST: f64 = 0.2;
const LENGTH_BOOST: f64 = 0.1;
/// Minimum `1 - |l1 - l2| / max(l1, l2)` for the length boost.
const LENGTH_RATIO: f64 = 0.8;

static REPLY_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:(?:re|fwd|fw):\s*)+").unwrap());

/// Lowercased subject without leading `re:` / `fwd:` / `fw:` markers.
fn normalized_subject(subject: &str) -> String {
    let lower = subject.to_lowercase();
    REPLY_MARKERS.replace(&lower, "").trim().to_string()
}

fn comparison_text(item: &WorkItem) -> String {
    format!(
        "{} {} {}",
        item.sender,
        item.subject,
        truncate_chars(&item.body, BODY_CHARS)
    )
    .to_lowercase()
}

#[derive(Debug, Clone, Copy)]
pub struct SimilarityGrouper {
    threshold: f64,
}

impl SimilarityGrouper {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score in `[0.0, 1.0]`: text ratio plus sender, subject and length boosts.
    pub fn score(&self, a: &WorkItem, b: &WorkItem) -> f64 {
        score_with_text(a, &comparison_text(a), b, &comparison_text(b))
    }

    /// Partition `items` into anchor-based groups, preserving input order.
    pub fn group(&self, items: Vec<WorkItem>) -> Vec<SimilarityGroup> {
        let texts: Vec<String> = items.iter().map(comparison_text).collect();
        let mut claimed = vec![false; items.len()];
        let mut group_indices: Vec<Vec<usize>> = Vec::new();

        for anchor in 0..items.len() {
            if claimed[anchor] {
                continue;
            }
            claimed[anchor] = true;
            let mut members = vec![anchor];

            for other in anchor + 1..items.len() {
                if claimed[other] {
                    continue;
                }
                let score =
                    score_with_text(&items[anchor], &texts[anchor], &items[other], &texts[other]);
                if score >= self.threshold {
                    claimed[other] = true;
                    members.push(other);
                }
            }

            group_indices.push(members);
        }

        let mut slots: Vec<Option<WorkItem>> = items.into_iter().map(Some).collect();
        group_indices
            .into_iter()
            .map(|members| {
                members
                    .into_iter()
                    .filter_map(|idx| slots[idx].take())
                    .collect()
            })
            .collect()
    }
}

fn score_with_text(a: &WorkItem, text_a: &str, b: &WorkItem, text_b: &str) -> f64 {
    let mut score = sequence_ratio(text_a, text_b);

    if a.sender.to_lowercase() == b.sender.to_lowercase() {
        score += SENDER_BOOST;
    }

    if !a.subject.is_empty()
        && !b.subject.is_empty()
        && normalized_subject(&a.subject) == normalized_subject(&b.subject)
    {
        score += SUBJECT_BOOST;
    }

    let (len_a, len_b) = (a.body.chars().count(), b.body.chars().count());
    if len_a > 0 && len_b > 0 {
        let diff = len_a.abs_diff(len_b) as f64;
        if 1.0 - diff / len_a.max(len_b) as f64 > LENGTH_RATIO {
            score += LENGTH_BOOST;
        }
    }

    score.min(1.0)
}
