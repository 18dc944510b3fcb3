//! Stack frequency aggregation

use std::collections::HashMap;

use crate::encoder::StackKey;

/// Occurrence count per distinct stack
///
/// Every key present has a count of at least 1.
#[derive(Debug, Default, Clone)]
pub struct FrequencyTable {
    counts: HashMap<StackKey, u64>,
    total: u64,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `key`, inserting it if absent
    pub fn record(&mut self, key: StackKey) {
        *self.counts.entry(key).or_insert(0) += 1;
        self.total += 1;
    }

    /// Count `count` occurrences of `key` at once. A zero count is ignored.
    pub fn record_many(&mut self, key: StackKey, count: u64) {
        if count == 0 {
            return;
        }
        *self.counts.entry(key).or_insert(0) += count;
        self.total += count;
    }

    /// Occurrences recorded for `key`
    pub fn count(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Number of distinct stacks
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Occurrences recorded since creation or the last `clear`
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn clear(&mut self) {
        self.counts.clear();
        self.total = 0;
    }

    /// All entries, highest count first
    ///
    /// Ties are ordered by key so the output does not depend on hash order.
    pub fn export_sorted(&self) -> Vec<(StackKey, u64)> {
        let mut entries: Vec<(StackKey, u64)> = self
            .counts
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}
