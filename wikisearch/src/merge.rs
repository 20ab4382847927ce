//! Result Merge Engine for the offline stream.
//!
//! Full-text hits come first in their own order, then title hits whose id
//! is not already present, in theirs. This is an order-preserving union with
//! full-text priority, not a score blend.

use std::collections::HashSet;

use crate::interface::ResultItem;

pub fn merge(title_results: Vec<ResultItem>, fts_results: Vec<ResultItem>) -> Vec<ResultItem> {
    let mut seen: HashSet<String> = HashSet::with_capacity(fts_results.len() + title_results.len());
    let mut merged = Vec::with_capacity(fts_results.len() + title_results.len());

    // A source may repeat an id; the first occurrence wins
    for item in fts_results.into_iter().chain(title_results) {
        if seen.insert(item.id.clone()) {
            merged.push(item);
        }
    }

    merged
}
