//! Character-level similarity scoring.
//!
//! Implements gestalt pattern matching (Ratcliff/Obershelp): find the longest
//! common block, recurse on the unmatched text to its left and right, and
//! report `2 * matched / (len(a) + len(b))`.
//!
//! When `b` has at least 200 chars, chars occurring in it more than
//! `len(b) / 100 + 1` times are too common to seed a match. They can still
//! extend a block found from rarer chars.

use std::collections::{HashMap, HashSet};

const POPULAR_MIN_LEN: usize = 200;

/// Similarity ratio in `[0.0, 1.0]` between two strings, compared per char.
///
/// Two empty strings are considered identical.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn popular_chars(b: &[char]) -> HashSet<char> {
    if b.len() < POPULAR_MIN_LEN {
        return HashSet::new();
    }

    let limit = b.len() / 100 + 1;
    let mut counts: HashMap<char, usize> = HashMap::new();
    for &c in b {
        *counts.entry(c).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|&(_, n)| n > limit)
        .map(|(c, _)| c)
        .collect()
}

/// Total size of all matching blocks between `a` and `b`.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let popular = popular_chars(b);
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, b, &popular, (alo, ahi), (blo, bhi));
        if k == 0 {
            continue;
        }
        matched += k;

        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }

    matched
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]` as `(i, j, len)`.
/// Ties resolve to the block starting earliest in `a`, then in `b`. Only
/// non-popular chars seed blocks; the winner is then widened over equal chars
/// on both sides.
fn longest_match(
    a: &[char],
    b: &[char],
    popular: &HashSet<char>,
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_len) = (alo, blo, 0);

    // Rolling rows of the common-suffix length table, offset by one column.
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut curr = vec![0usize; width + 1];

    for i in alo..ahi {
        for j in blo..bhi {
            let col = j - blo + 1;
            if a[i] == b[j] && !popular.contains(&b[j]) {
                let len = prev[col - 1] + 1;
                curr[col] = len;
                if len > best_len {
                    best_i = i + 1 - len;
                    best_j = j + 1 - len;
                    best_len = len;
                }
            } else {
                curr[col] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    while best_i > alo && best_j > blo && a[best_i - 1] == b[best_j - 1] {
        best_i -= 1;
        best_j -= 1;
        best_len += 1;
    }
    while best_i + best_len < ahi
        && best_j + best_len < bhi
        && a[best_i + best_len] == b[best_j + best_len]
    {
        best_len += 1;
    }

    (best_i, best_j, best_len)
}
