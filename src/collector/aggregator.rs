// * Per-identifier occurrence counter
// * Keys exist only for identifiers seen since the last flush, and every value is >= 1

use serde::Serialize;
use std::collections::BTreeMap;

pub type CounterMap = BTreeMap<String, u64>;

/// One flushed window of counts, ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReportBatch {
    counts: CounterMap,
}

impl ReportBatch {
    pub fn counts(&self) -> &CounterMap {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// JSON object mapping identifier → count.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Default)]
pub struct Aggregator {
    counts: CounterMap,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, id: &str) -> u64 {
        let count = self.counts.entry(id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn count(&self, id: &str) -> u64 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn snapshot(&self) -> CounterMap {
        self.counts.clone()
    }

    /// Read-and-clear. Returns None when nothing has been counted.
    pub fn take(&mut self) -> Option<ReportBatch> {
        if self.counts.is_empty() {
            return None;
        }
        Some(ReportBatch {
            counts: std::mem::take(&mut self.counts),
        })
    }
}
