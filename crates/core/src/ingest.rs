use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunking::{build_page_chunks, SplitConfig};
use crate::error::{IngestError, SearchError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::identity;
use crate::models::{
    BatchOutcome, ChildChunk, DocumentFingerprint, IngestionOptions, IngestionReport, PageChunk,
    PageText, ParentPage,
};
use crate::traits::{ChunkIndex, PageIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestProgress {
    Extracted { pages: usize },
    RecordsBuilt { pages: usize, chunks: usize },
    ParentBatches { done: usize, total: usize },
    ChildBatches { done: usize, total: usize },
    Completed,
}

/// The only channel between the pipeline and whatever tracks the job.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgress);
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgress) {}
}

pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: IngestProgress) {
        match event {
            IngestProgress::Extracted { pages } => info!(pages, "extraction finished"),
            IngestProgress::RecordsBuilt { pages, chunks } => {
                info!(pages, chunks, "records built")
            }
            IngestProgress::ParentBatches { done, total } => {
                info!(done, total, "parent batches inserted")
            }
            IngestProgress::ChildBatches { done, total } => {
                info!(done, total, "child batches inserted")
            }
            IngestProgress::Completed => info!("ingestion finished"),
        }
    }
}

pub struct IngestionPipeline<P, C> {
    pages: P,
    chunks: C,
    options: IngestionOptions,
}

impl<P, C> IngestionPipeline<P, C>
where
    P: PageIndex,
    C: ChunkIndex,
{
    pub fn new(pages: P, chunks: C, options: IngestionOptions) -> Self {
        Self {
            pages,
            chunks,
            options,
        }
    }

    pub async fn ingest(
        &self,
        fingerprint: &DocumentFingerprint,
        pages: &[PageText],
        progress: &dyn ProgressReporter,
    ) -> Result<IngestionReport, IngestError> {
        if pages.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pages to ingest for {}",
                fingerprint.document_id
            )));
        }
        for window in pages.windows(2) {
            if window[1].page < window[0].page {
                return Err(IngestError::InvalidArgument(format!(
                    "page numbers regress at page {}",
                    window[1].page
                )));
            }
        }

        let config = SplitConfig::from(&self.options);
        let mut parent_records = Vec::with_capacity(pages.len());
        let mut child_records = Vec::new();

        for page in pages {
            let parent = build_parent_page(fingerprint, page);
            for chunk in build_page_chunks(page.page, &page.text, &config)? {
                child_records.push(build_child_chunk(fingerprint, parent.id, &chunk));
            }
            parent_records.push(parent);
        }

        progress.report(IngestProgress::RecordsBuilt {
            pages: parent_records.len(),
            chunks: child_records.len(),
        });
        info!(
            document = %fingerprint.document_id,
            pages = parent_records.len(),
            chunks = child_records.len(),
            "ingesting document"
        );

        let mut pages_failed = 0usize;
        let parent_batches: Vec<&[ParentPage]> = parent_records
            .chunks(self.options.parent_batch_size.max(1))
            .collect();
        let total = parent_batches.len();
        for (index, batch) in parent_batches.into_iter().enumerate() {
            let outcome = self.insert_parent_batch(batch).await?;
            for failure in &outcome.failures {
                warn!(id = %failure.id, reason = %failure.reason, "parent page insert failed permanently");
            }
            pages_failed += outcome.failures.len();
            progress.report(IngestProgress::ParentBatches {
                done: index + 1,
                total,
            });
            if self.options.batch_delay_ms > 0 && index + 1 < total {
                sleep(Duration::from_millis(self.options.batch_delay_ms)).await;
            }
        }

        let mut chunks_failed = 0usize;
        let child_batches: Vec<&[ChildChunk]> = child_records
            .chunks(self.options.child_batch_size.max(1))
            .collect();
        let total = child_batches.len();
        for (index, batch) in child_batches.into_iter().enumerate() {
            let outcome = self.insert_child_batch(batch).await?;
            for failure in &outcome.failures {
                warn!(id = %failure.id, reason = %failure.reason, "chunk insert failed permanently");
            }
            chunks_failed += outcome.failures.len();
            progress.report(IngestProgress::ChildBatches {
                done: index + 1,
                total,
            });
            if self.options.batch_delay_ms > 0 && index + 1 < total {
                sleep(Duration::from_millis(self.options.batch_delay_ms)).await;
            }
        }

        let report = IngestionReport {
            pages_processed: parent_records.len(),
            pages_failed,
            chunks_created: child_records.len(),
            chunks_inserted: child_records.len() - chunks_failed,
            chunks_failed,
        };
        progress.report(IngestProgress::Completed);
        info!(
            document = %fingerprint.document_id,
            inserted = report.chunks_inserted,
            failed = report.chunks_failed,
            "ingestion finished"
        );

        Ok(report)
    }

    async fn insert_parent_batch(&self, batch: &[ParentPage]) -> Result<BatchOutcome, SearchError> {
        let mut outcome = self.pages.insert_pages(batch).await?;
        let mut attempt = 0;
        while !outcome.failures.is_empty() && attempt < self.options.max_batch_retries {
            attempt += 1;
            warn!(failed = outcome.failures.len(), attempt, "retrying parent batch");
            if self.options.batch_delay_ms > 0 {
                sleep(Duration::from_millis(self.options.batch_delay_ms)).await;
            }
            outcome = self.pages.insert_pages(batch).await?;
        }
        Ok(outcome)
    }

    async fn insert_child_batch(&self, batch: &[ChildChunk]) -> Result<BatchOutcome, SearchError> {
        let mut outcome = self.chunks.insert_chunks(batch).await?;
        let mut attempt = 0;
        while !outcome.failures.is_empty() && attempt < self.options.max_batch_retries {
            attempt += 1;
            warn!(failed = outcome.failures.len(), attempt, "retrying chunk batch");
            if self.options.batch_delay_ms > 0 {
                sleep(Duration::from_millis(self.options.batch_delay_ms)).await;
            }
            outcome = self.chunks.insert_chunks(batch).await?;
        }
        Ok(outcome)
    }
}

fn build_parent_page(fingerprint: &DocumentFingerprint, page: &PageText) -> ParentPage {
    ParentPage {
        id: identity::parent_page_id(&fingerprint.document_id, page.page),
        document_id: fingerprint.document_id.clone(),
        document_slug: fingerprint.slug.clone(),
        page: page.page,
        content: page.text.clone(),
        filename: fingerprint.filename.clone(),
        company_id: fingerprint.company_id.clone(),
        company_name: fingerprint.company_name.clone(),
        report_type: fingerprint.report_type.clone(),
        reporting_year: fingerprint.reporting_year,
    }
}

fn build_child_chunk(
    fingerprint: &DocumentFingerprint,
    parent_id: Uuid,
    chunk: &PageChunk,
) -> ChildChunk {
    ChildChunk {
        id: identity::child_chunk_id(&fingerprint.document_id, chunk.page, chunk.chunk_index),
        parent_id,
        document_id: fingerprint.document_id.clone(),
        document_slug: fingerprint.slug.clone(),
        page: chunk.page,
        chunk_index: chunk.chunk_index,
        content: chunk.content.clone(),
        filename: fingerprint.filename.clone(),
    }
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

pub fn build_document_fingerprint(
    path: &Path,
    bytes: &[u8],
    document_id: Option<String>,
) -> Result<DocumentFingerprint, IngestError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })?;
    let stem = path
        .file_stem()
        .and_then(|name| name.to_str())
        .unwrap_or(filename);

    let checksum = digest_bytes(bytes);
    let document_id = document_id.unwrap_or_else(|| checksum[..16].to_string());

    Ok(DocumentFingerprint {
        document_id,
        slug: slugify(stem),
        filename: filename.to_string(),
        company_id: None,
        company_name: None,
        report_type: None,
        reporting_year: None,
        checksum,
        ingested_at: Utc::now(),
    })
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct FolderReport {
    pub ingested: Vec<(PathBuf, IngestionReport)>,
    pub skipped: Vec<SkippedPdf>,
}

pub async fn ingest_pdf_file<P, C>(
    pipeline: &IngestionPipeline<P, C>,
    path: &Path,
    progress: &dyn ProgressReporter,
) -> Result<IngestionReport, IngestError>
where
    P: PageIndex,
    C: ChunkIndex,
{
    let bytes = tokio::fs::read(path).await?;
    let fingerprint = build_document_fingerprint(path, &bytes, None)?;
    let pages = LopdfExtractor.extract_pages(&bytes)?;
    progress.report(IngestProgress::Extracted { pages: pages.len() });
    pipeline.ingest(&fingerprint, &pages, progress).await
}

pub async fn ingest_folder<P, C>(
    pipeline: &IngestionPipeline<P, C>,
    folder: &Path,
) -> Result<FolderReport, IngestError>
where
    P: PageIndex,
    C: ChunkIndex,
{
    let files = discover_pdf_files(folder);
    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let mut ingested = Vec::new();
    let mut skipped = Vec::new();

    for path in files {
        match ingest_pdf_file(pipeline, &path, &NoProgress).await {
            Ok(report) => ingested.push((path, report)),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipping pdf");
                skipped.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(FolderReport { ingested, skipped })
}
