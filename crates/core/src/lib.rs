pub mod aggregate;
pub mod chunking;
pub mod error;
pub mod extractor;
pub mod identity;
pub mod ingest;
pub mod jobs;
pub mod models;
pub mod retrieval;
pub mod stores;
pub mod traits;

pub use aggregate::{AggregationOptions, MultiQueryAggregator};
pub use chunking::{build_page_chunks, default_separators, split_text, SplitConfig};
pub use error::{IngestError, SearchError};
pub use extractor::{extract_page_texts, LopdfExtractor, PdfExtractor};
pub use identity::{child_chunk_id, deterministic_id, parent_page_id};
pub use ingest::{
    build_document_fingerprint, digest_bytes, discover_pdf_files, ingest_folder, ingest_pdf_file,
    slugify, FolderReport, IngestProgress, IngestionPipeline, LogProgress, NoProgress,
    ProgressReporter, SkippedPdf,
};
pub use jobs::{Job, JobKind, JobProgress, JobStatus, JobTracker};
pub use models::{
    BatchOutcome, BatchQueryResult, ChildChunk, ChunkHit, DocumentFingerprint,
    DocumentSearchResult, FailedInsert, IngestionOptions, IngestionReport, PageChunk, PageText,
    ParentPage, RetrievalHit,
};
pub use retrieval::{RetrievalEngine, RetrievalOptions};
pub use stores::WeaviateStore;
pub use traits::{ChunkIndex, PageIndex};
