// src/record.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Engagement counters as reported by the originating platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub score: u64,
    pub comment_count: u64,
}

/// One unit of scraped or transcribed text. Immutable except for `processed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,     // stable, unique per source
    pub source: String, // e.g. "reddit", "appstore", "community", "interview"
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub engagement: Engagement,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
}

/// Supplies unclassified records on demand. Scrapers live behind this seam.
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError>;
    async fn mark_processed(&self, record_id: &str) -> Result<(), StoreError>;
    fn name(&self) -> &'static str;
}
