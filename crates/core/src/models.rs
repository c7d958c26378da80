use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub slug: String,
    pub filename: String,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
    pub report_type: Option<String>,
    pub reporting_year: Option<i32>,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageChunk {
    pub content: String,
    pub page: u32,
    pub chunk_index: u32,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentPage {
    pub id: Uuid,
    pub document_id: String,
    pub document_slug: String,
    pub page: u32,
    pub content: String,
    pub filename: String,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
    pub report_type: Option<String>,
    pub reporting_year: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildChunk {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub document_id: String,
    pub document_slug: String,
    pub page: u32,
    pub chunk_index: u32,
    pub content: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    pub id: Uuid,
    pub document_id: String,
    pub page: u32,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub document_id: String,
    pub page: u32,
    pub content: String,
    pub filename: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSearchResult {
    pub document_id: String,
    pub hits: Vec<RetrievalHit>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchQueryResult {
    pub question: String,
    pub document_id: String,
    pub hits: Vec<RetrievalHit>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub failures: Vec<FailedInsert>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedInsert {
    pub id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionReport {
    pub pages_processed: usize,
    pub pages_failed: usize,
    pub chunks_created: usize,
    pub chunks_inserted: usize,
    pub chunks_failed: usize,
}

impl IngestionReport {
    pub fn success(&self) -> bool {
        self.chunks_failed == 0
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
    pub parent_batch_size: usize,
    pub child_batch_size: usize,
    pub max_batch_retries: u32,
    pub batch_delay_ms: u64,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            separators: crate::chunking::default_separators(),
            parent_batch_size: 50,
            child_batch_size: 100,
            max_batch_retries: 3,
            batch_delay_ms: 100,
        }
    }
}
