// src/store/json_file.rs
//! Single-file JSON store.
//!
//! Every mutation is applied to a copy of the state, the copy is written to
//! `<path>.tmp` and renamed over `<path>`, and only then does the in-memory
//! state advance. A failed write leaves both disk and memory unchanged.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::insight::{ClassifiedInsight, ScreeningResult};
use crate::prefilter::KnownRecords;
use crate::record::{RawRecord, RecordSource};

use super::{FailureMarker, InsightFilter, InsightStore, StoreState, StoreStats};

pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        info!(target: "store", path = %path.display(), "json store opened");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add records from a scraper export. Known ids are skipped.
    pub async fn import_records(
        &self,
        records: impl IntoIterator<Item = RawRecord> + Send,
    ) -> Result<usize, StoreError> {
        let records: Vec<RawRecord> = records.into_iter().collect();
        self.mutate(move |s| Ok(s.import_records(records))).await
    }

    async fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        let guard = self.state.lock().await;
        f(&guard)
    }

    async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        persist(&self.path, &next).await?;
        *guard = next;
        Ok(out)
    }
}

async fn persist(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let json = serde_json::to_vec_pretty(state)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(target: "store", bytes = json.len(), "snapshot written");
    Ok(())
}

#[async_trait::async_trait]
impl RecordSource for JsonFileStore {
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError> {
        Ok(self.read(|s| s.fetch_unprocessed(limit)).await)
    }

    async fn mark_processed(&self, record_id: &str) -> Result<(), StoreError> {
        self.mutate(|s| s.mark_processed(record_id)).await
    }

    fn name(&self) -> &'static str {
        "json_file"
    }
}

#[async_trait::async_trait]
impl InsightStore for JsonFileStore {
    async fn upsert_insight(&self, insight: ClassifiedInsight) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.upsert_insight(insight);
            Ok(())
        })
        .await
    }

    async fn commit_classified(&self, insight: ClassifiedInsight) -> Result<(), StoreError> {
        self.mutate(|s| s.commit_classified(insight)).await
    }

    async fn record_failure(&self, marker: FailureMarker) -> Result<(), StoreError> {
        self.mutate(|s| s.record_failure(marker)).await
    }

    async fn record_screening(&self, result: ScreeningResult) -> Result<(), StoreError> {
        self.mutate(|s| s.record_screening(result)).await
    }

    async fn get_insight(&self, record_id: &str) -> Result<Option<ClassifiedInsight>, StoreError> {
        Ok(self.read(|s| s.get_insight(record_id)).await)
    }

    async fn list_insights(
        &self,
        filter: &InsightFilter,
    ) -> Result<Vec<ClassifiedInsight>, StoreError> {
        Ok(self.read(|s| s.list_insights(filter)).await)
    }

    async fn failures(&self) -> Result<Vec<FailureMarker>, StoreError> {
        Ok(self.read(|s| s.failures()).await)
    }

    async fn known_records(&self) -> Result<KnownRecords, StoreError> {
        Ok(self.read(|s| s.known_records()).await)
    }

    async fn reprocess_failed(&self, record_ids: &[String]) -> Result<usize, StoreError> {
        self.mutate(|s| Ok(s.reprocess_failed(record_ids))).await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self.read(|s| s.stats()).await)
    }
}
