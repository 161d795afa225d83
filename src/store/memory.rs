// src/store/memory.rs
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::insight::{ClassifiedInsight, ScreeningResult};
use crate::prefilter::KnownRecords;
use crate::record::{RawRecord, RecordSource};

use super::{FailureMarker, InsightFilter, InsightStore, StoreState, StoreStats};

/// In-process store that is both the record source and the insight store.
/// One lock guards everything, so each method is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = RawRecord>) -> Self {
        let store = Self::new();
        store.import_records(records);
        store
    }

    pub fn import_records(&self, records: impl IntoIterator<Item = RawRecord>) -> usize {
        self.state.lock().import_records(records)
    }

    pub fn record(&self, id: &str) -> Option<RawRecord> {
        self.state.lock().record(id).cloned()
    }
}

#[async_trait::async_trait]
impl RecordSource for MemoryStore {
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError> {
        Ok(self.state.lock().fetch_unprocessed(limit))
    }

    async fn mark_processed(&self, record_id: &str) -> Result<(), StoreError> {
        self.state.lock().mark_processed(record_id)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait::async_trait]
impl InsightStore for MemoryStore {
    async fn upsert_insight(&self, insight: ClassifiedInsight) -> Result<(), StoreError> {
        self.state.lock().upsert_insight(insight);
        Ok(())
    }

    async fn commit_classified(&self, insight: ClassifiedInsight) -> Result<(), StoreError> {
        self.state.lock().commit_classified(insight)
    }

    async fn record_failure(&self, marker: FailureMarker) -> Result<(), StoreError> {
        self.state.lock().record_failure(marker)
    }

    async fn record_screening(&self, result: ScreeningResult) -> Result<(), StoreError> {
        self.state.lock().record_screening(result)
    }

    async fn get_insight(&self, record_id: &str) -> Result<Option<ClassifiedInsight>, StoreError> {
        Ok(self.state.lock().get_insight(record_id))
    }

    async fn list_insights(
        &self,
        filter: &InsightFilter,
    ) -> Result<Vec<ClassifiedInsight>, StoreError> {
        Ok(self.state.lock().list_insights(filter))
    }

    async fn failures(&self) -> Result<Vec<FailureMarker>, StoreError> {
        Ok(self.state.lock().failures())
    }

    async fn known_records(&self) -> Result<KnownRecords, StoreError> {
        Ok(self.state.lock().known_records())
    }

    async fn reprocess_failed(&self, record_ids: &[String]) -> Result<usize, StoreError> {
        Ok(self.state.lock().reprocess_failed(record_ids))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self.state.lock().stats())
    }
}
