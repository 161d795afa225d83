// src/store/mod.rs
//! Persistence contract used by the funnel, reranker and aggregator.
//!
//! `record_id` is the unique key for insights; writes are upserts. The insight
//! write and the `processed` flip are one atomic unit (`commit_classified`).

pub mod json_file;
pub mod memory;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::funnel::state::Stage;
use crate::insight::{Category, ClassifiedInsight, ScreeningResult};
use crate::prefilter::KnownRecords;
use crate::record::RawRecord;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// Marks a record whose deep classification failed. Blocks automatic
/// re-processing until an operator clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureMarker {
    pub record_id: String,
    pub stage: Stage,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Selection over the insight set. Empty filter selects everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightFilter {
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub min_frustration: Option<u8>,
    #[serde(default)]
    pub wtp_only: bool,
    /// Inclusive lower bound on the source record's creation time.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the source record's creation time.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl InsightFilter {
    pub fn matches(&self, i: &ClassifiedInsight) -> bool {
        if self.category.is_some_and(|c| c != i.category) {
            return false;
        }
        if self.source.as_deref().is_some_and(|s| s != i.source) {
            return false;
        }
        if self.min_frustration.is_some_and(|m| i.frustration_level < m) {
            return false;
        }
        if self.wtp_only && !i.willingness_to_pay {
            return false;
        }
        if self.since.is_some_and(|t| i.source_created_at < t) {
            return false;
        }
        if self.until.is_some_and(|t| i.source_created_at >= t) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: usize,
    pub processed: usize,
    pub unprocessed: usize,
    pub insights: usize,
    pub failures: usize,
    pub by_category: BTreeMap<String, usize>,
}

/// Insight persistence as seen by the funnel and its readers.
#[async_trait::async_trait]
pub trait InsightStore: Send + Sync {
    /// Insert or overwrite the insight for `insight.record_id`.
    async fn upsert_insight(&self, insight: ClassifiedInsight) -> Result<(), StoreError>;

    /// Upsert the insight and mark its record processed, atomically.
    async fn commit_classified(&self, insight: ClassifiedInsight) -> Result<(), StoreError>;

    /// Store a failure marker and mark the record processed, atomically.
    async fn record_failure(&self, marker: FailureMarker) -> Result<(), StoreError>;

    /// Keep a passed screening result for a record deferred before deep
    /// classification. Cleared once the record is marked processed.
    async fn record_screening(&self, result: ScreeningResult) -> Result<(), StoreError>;

    async fn get_insight(&self, record_id: &str) -> Result<Option<ClassifiedInsight>, StoreError>;

    /// Matching insights ordered by `record_id`.
    async fn list_insights(&self, filter: &InsightFilter)
        -> Result<Vec<ClassifiedInsight>, StoreError>;

    async fn failures(&self) -> Result<Vec<FailureMarker>, StoreError>;

    /// Snapshot consumed by the pre-filter at run start.
    async fn known_records(&self) -> Result<KnownRecords, StoreError>;

    /// Clear failure markers and reset `processed` for the given ids.
    /// Returns how many markers were cleared.
    async fn reprocess_failed(&self, record_ids: &[String]) -> Result<usize, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Plain data behind both store implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    #[serde(default)]
    records: BTreeMap<String, RawRecord>,
    #[serde(default)]
    insights: BTreeMap<String, ClassifiedInsight>,
    #[serde(default)]
    failures: BTreeMap<String, FailureMarker>,
    #[serde(default)]
    screened: BTreeMap<String, ScreeningResult>,
}

impl StoreState {
    /// Insert records that are not yet known. Existing ids are left untouched.
    pub(crate) fn import_records(&mut self, records: impl IntoIterator<Item = RawRecord>) -> usize {
        let mut added = 0;
        for r in records {
            if !self.records.contains_key(&r.id) {
                self.records.insert(r.id.clone(), r);
                added += 1;
            }
        }
        added
    }

    pub(crate) fn record(&self, id: &str) -> Option<&RawRecord> {
        self.records.get(id)
    }

    pub(crate) fn fetch_unprocessed(&self, limit: usize) -> Vec<RawRecord> {
        self.records
            .values()
            .filter(|r| !r.processed)
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn mark_processed(&mut self, record_id: &str) -> Result<(), StoreError> {
        let r = self
            .records
            .get_mut(record_id)
            .ok_or_else(|| StoreError::NotFound {
                record_id: record_id.to_string(),
            })?;
        r.processed = true;
        self.screened.remove(record_id);
        Ok(())
    }

    pub(crate) fn record_screening(&mut self, result: ScreeningResult) -> Result<(), StoreError> {
        let known = self.records.get(&result.record_id).is_some_and(|r| !r.processed);
        if !known {
            return Err(StoreError::NotFound {
                record_id: result.record_id,
            });
        }
        self.screened.insert(result.record_id.clone(), result);
        Ok(())
    }

    pub(crate) fn upsert_insight(&mut self, insight: ClassifiedInsight) {
        self.insights.insert(insight.record_id.clone(), insight);
    }

    pub(crate) fn commit_classified(&mut self, insight: ClassifiedInsight) -> Result<(), StoreError> {
        let id = insight.record_id.clone();
        self.mark_processed(&id)?;
        self.failures.remove(&id);
        self.upsert_insight(insight);
        Ok(())
    }

    pub(crate) fn record_failure(&mut self, marker: FailureMarker) -> Result<(), StoreError> {
        self.mark_processed(&marker.record_id)?;
        self.failures.insert(marker.record_id.clone(), marker);
        Ok(())
    }

    pub(crate) fn get_insight(&self, record_id: &str) -> Option<ClassifiedInsight> {
        self.insights.get(record_id).cloned()
    }

    pub(crate) fn list_insights(&self, filter: &InsightFilter) -> Vec<ClassifiedInsight> {
        self.insights
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect()
    }

    pub(crate) fn failures(&self) -> Vec<FailureMarker> {
        self.failures.values().cloned().collect()
    }

    pub(crate) fn known_records(&self) -> KnownRecords {
        KnownRecords {
            classified: self.insights.keys().cloned().collect(),
            failed: self.failures.keys().cloned().collect(),
            fingerprints: self
                .insights
                .values()
                .map(|i| i.content_fingerprint.clone())
                .collect::<HashSet<_>>(),
            screened: self
                .screened
                .iter()
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect(),
        }
    }

    pub(crate) fn reprocess_failed(&mut self, record_ids: &[String]) -> usize {
        let mut cleared = 0;
        for id in record_ids {
            if self.failures.remove(id).is_some() {
                cleared += 1;
                if let Some(r) = self.records.get_mut(id) {
                    r.processed = false;
                }
            }
        }
        cleared
    }

    pub(crate) fn stats(&self) -> StoreStats {
        let processed = self.records.values().filter(|r| r.processed).count();
        let mut by_category = BTreeMap::new();
        for i in self.insights.values() {
            *by_category.entry(i.category.as_str().to_string()).or_insert(0) += 1;
        }
        StoreStats {
            records: self.records.len(),
            processed,
            unprocessed: self.records.len() - processed,
            insights: self.insights.len(),
            failures: self.failures.len(),
            by_category,
        }
    }
}
