use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::warn;

use crate::models::{BatchQueryResult, DocumentSearchResult};
use crate::retrieval::RetrievalEngine;
use crate::traits::{ChunkIndex, PageIndex};

#[derive(Debug, Clone)]
pub struct AggregationOptions {
    pub max_concurrent_documents: usize,
    pub question_delay_ms: u64,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 10,
            question_delay_ms: 200,
        }
    }
}

/// Fans one query across documents, or a question list across documents.
/// Every input unit produces exactly one record; a failed unit carries its
/// error instead of dropping out.
pub struct MultiQueryAggregator<C, P>
where
    C: ChunkIndex,
    P: PageIndex,
{
    engine: RetrievalEngine<C, P>,
    options: AggregationOptions,
}

impl<C, P> MultiQueryAggregator<C, P>
where
    C: ChunkIndex + Send + Sync,
    P: PageIndex + Send + Sync,
{
    pub fn new(engine: RetrievalEngine<C, P>) -> Self {
        Self::with_options(engine, AggregationOptions::default())
    }

    pub fn with_options(engine: RetrievalEngine<C, P>, options: AggregationOptions) -> Self {
        Self { engine, options }
    }

    pub fn engine(&self) -> &RetrievalEngine<C, P> {
        &self.engine
    }

    pub async fn search_documents(
        &self,
        query: &str,
        document_ids: &[String],
        k: usize,
    ) -> Vec<DocumentSearchResult> {
        let cap = self
            .options
            .max_concurrent_documents
            .min(document_ids.len())
            .max(1);

        stream::iter(document_ids.iter().map(|document_id| async move {
            match self
                .engine
                .retrieve(query, std::slice::from_ref(document_id), k)
                .await
            {
                Ok(hits) => DocumentSearchResult {
                    document_id: document_id.clone(),
                    hits,
                    error: None,
                },
                Err(error) => {
                    warn!(document = %document_id, error = %error, "document search failed");
                    DocumentSearchResult {
                        document_id: document_id.clone(),
                        hits: Vec::new(),
                        error: Some(error.to_string()),
                    }
                }
            }
        }))
        .buffered(cap)
        .collect()
        .await
    }

    /// Runs every (question, document) pair sequentially, reporting
    /// `(completed, total)` after each one.
    pub async fn run_question_batch<F>(
        &self,
        questions: &[String],
        document_ids: &[String],
        k: usize,
        mut progress: F,
    ) -> Vec<BatchQueryResult>
    where
        F: FnMut(usize, usize),
    {
        let total = questions.len() * document_ids.len();
        let mut records = Vec::with_capacity(total);

        for question in questions {
            for document_id in document_ids {
                let record = match self
                    .engine
                    .retrieve(question, std::slice::from_ref(document_id), k)
                    .await
                {
                    Ok(hits) => BatchQueryResult {
                        question: question.clone(),
                        document_id: document_id.clone(),
                        hits,
                        error: None,
                    },
                    Err(error) => {
                        warn!(
                            question = %question,
                            document = %document_id,
                            error = %error,
                            "question failed for document"
                        );
                        BatchQueryResult {
                            question: question.clone(),
                            document_id: document_id.clone(),
                            hits: Vec::new(),
                            error: Some(error.to_string()),
                        }
                    }
                };
                records.push(record);
                progress(records.len(), total);

                if self.options.question_delay_ms > 0 && records.len() < total {
                    sleep(Duration::from_millis(self.options.question_delay_ms)).await;
                }
            }
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::jobs::{JobKind, JobStatus, JobTracker};
    use crate::models::{BatchOutcome, ChildChunk, ChunkHit, ParentPage};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use uuid::Uuid;

    #[derive(Default)]
    struct ConcurrencyGauge {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ConcurrencyGauge {
        fn enter(&self) {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        fn max(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct FakeChunkIndex {
        hits_by_document: HashMap<String, Vec<ChunkHit>>,
        failing_documents: Vec<String>,
        slow_documents: Vec<String>,
        gauge: Arc<ConcurrencyGauge>,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl ChunkIndex for FakeChunkIndex {
        async fn insert_chunks(&self, _batch: &[ChildChunk]) -> Result<BatchOutcome, SearchError> {
            Ok(BatchOutcome::default())
        }

        async fn hybrid_search(
            &self,
            _query: &str,
            document_ids: &[String],
            _limit: usize,
        ) -> Result<Vec<ChunkHit>, SearchError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.gauge.enter();

            let document = document_ids.first().cloned().unwrap_or_default();
            if self.slow_documents.contains(&document) {
                sleep(Duration::from_millis(20)).await;
            }
            let result = if self.failing_documents.contains(&document) {
                Err(SearchError::Request(format!("{document} unreachable")))
            } else {
                Ok(self
                    .hits_by_document
                    .get(&document)
                    .cloned()
                    .unwrap_or_default())
            };

            self.gauge.exit();
            result
        }
    }

    #[derive(Default)]
    struct FakePageIndex {
        pages: Vec<ParentPage>,
    }

    #[async_trait]
    impl PageIndex for FakePageIndex {
        async fn insert_pages(&self, _batch: &[ParentPage]) -> Result<BatchOutcome, SearchError> {
            Ok(BatchOutcome::default())
        }

        async fn fetch_page(
            &self,
            document_id: &str,
            page: u32,
        ) -> Result<Option<ParentPage>, SearchError> {
            Ok(self
                .pages
                .iter()
                .find(|record| record.document_id == document_id && record.page == page)
                .cloned())
        }
    }

    fn hit(document_id: &str, page: u32, score: f64) -> ChunkHit {
        ChunkHit {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            page,
            content: "excerpt".to_string(),
            score,
        }
    }

    fn parent(document_id: &str, page: u32) -> ParentPage {
        ParentPage {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            document_slug: "report".to_string(),
            page,
            content: format!("page {page} of {document_id}"),
            filename: "report.pdf".to_string(),
            company_id: None,
            company_name: None,
            report_type: None,
            reporting_year: None,
        }
    }

    fn docs(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn aggregator(
        chunks: FakeChunkIndex,
        pages: FakePageIndex,
    ) -> MultiQueryAggregator<FakeChunkIndex, FakePageIndex> {
        MultiQueryAggregator::with_options(
            RetrievalEngine::new(chunks, pages),
            AggregationOptions {
                max_concurrent_documents: 10,
                question_delay_ms: 0,
            },
        )
    }

    fn three_document_fixture() -> (FakeChunkIndex, FakePageIndex) {
        let mut hits_by_document = HashMap::new();
        hits_by_document.insert("d1".to_string(), vec![hit("d1", 1, 0.9)]);
        hits_by_document.insert("d3".to_string(), vec![hit("d3", 4, 0.6)]);
        let chunks = FakeChunkIndex {
            hits_by_document,
            failing_documents: vec!["d2".to_string()],
            ..Default::default()
        };
        let pages = FakePageIndex {
            pages: vec![parent("d1", 1), parent("d3", 4)],
        };
        (chunks, pages)
    }

    #[tokio::test]
    async fn one_failing_document_does_not_drop_the_others() {
        let (chunks, pages) = three_document_fixture();
        let aggregator = aggregator(chunks, pages);

        let records = aggregator
            .search_documents("net revenue", &docs(&["d1", "d2", "d3"]), 5)
            .await;

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].document_id, "d1");
        assert_eq!(records[0].hits.len(), 1);
        assert!(records[0].error.is_none());

        assert_eq!(records[1].document_id, "d2");
        assert!(records[1].hits.is_empty());
        assert!(records[1].error.as_deref().unwrap().contains("unreachable"));

        assert_eq!(records[2].document_id, "d3");
        assert_eq!(records[2].hits.len(), 1);
        assert!(records[2].error.is_none());
    }

    #[tokio::test]
    async fn fanout_output_order_follows_input_order() {
        let mut hits_by_document = HashMap::new();
        hits_by_document.insert("slow".to_string(), vec![hit("slow", 1, 0.9)]);
        hits_by_document.insert("fast".to_string(), vec![hit("fast", 1, 0.9)]);
        let chunks = FakeChunkIndex {
            hits_by_document,
            slow_documents: vec!["slow".to_string()],
            ..Default::default()
        };
        let pages = FakePageIndex {
            pages: vec![parent("slow", 1), parent("fast", 1)],
        };
        let aggregator = aggregator(chunks, pages);

        let records = aggregator
            .search_documents("q", &docs(&["slow", "fast"]), 5)
            .await;
        let order: Vec<&str> = records
            .iter()
            .map(|record| record.document_id.as_str())
            .collect();
        assert_eq!(order, vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn question_batches_cover_the_cross_product_in_order() {
        let (chunks, pages) = three_document_fixture();
        let aggregator = aggregator(chunks, pages);

        let mut reported = Vec::new();
        let records = aggregator
            .run_question_batch(
                &["q1".to_string(), "q2".to_string()],
                &docs(&["d1", "d2"]),
                5,
                |current, total| reported.push((current, total)),
            )
            .await;

        let order: Vec<(&str, &str)> = records
            .iter()
            .map(|record| (record.question.as_str(), record.document_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("q1", "d1"), ("q1", "d2"), ("q2", "d1"), ("q2", "d2")]
        );
        assert_eq!(reported, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);

        assert!(records[0].error.is_none());
        assert!(records[1].error.is_some());
        assert!(records[1].hits.is_empty());
        assert!(records[3].error.is_some());
    }

    #[tokio::test]
    async fn fanout_concurrency_stays_under_the_document_cap() {
        let ids: Vec<String> = (0..25).map(|n| format!("d{n:02}")).collect();
        let gauge = Arc::new(ConcurrencyGauge::default());
        let chunks = FakeChunkIndex {
            slow_documents: ids.clone(),
            gauge: Arc::clone(&gauge),
            ..Default::default()
        };
        let aggregator = aggregator(chunks, FakePageIndex::default());

        let records = aggregator.search_documents("q", &ids, 5).await;

        assert_eq!(records.len(), 25);
        assert!(gauge.max() >= 2, "sub-queries never overlapped");
        assert!(gauge.max() <= 10, "cap exceeded: {}", gauge.max());
    }

    #[tokio::test]
    async fn question_batch_units_never_overlap() {
        let ids = docs(&["d1", "d2", "d3"]);
        let gauge = Arc::new(ConcurrencyGauge::default());
        let chunks = FakeChunkIndex {
            slow_documents: ids.clone(),
            gauge: Arc::clone(&gauge),
            ..Default::default()
        };
        let aggregator = aggregator(chunks, FakePageIndex::default());

        let records = aggregator
            .run_question_batch(&["q1".to_string(), "q2".to_string()], &ids, 5, |_, _| {})
            .await;

        assert_eq!(records.len(), 6);
        assert_eq!(gauge.max(), 1);
    }

    #[tokio::test]
    async fn question_delays_run_between_units_but_not_after_the_last() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chunks = FakeChunkIndex {
            calls: Arc::clone(&calls),
            ..Default::default()
        };
        let aggregator = MultiQueryAggregator::with_options(
            RetrievalEngine::new(chunks, FakePageIndex::default()),
            AggregationOptions {
                max_concurrent_documents: 10,
                question_delay_ms: 40,
            },
        );

        let records = aggregator
            .run_question_batch(&["q1".to_string()], &docs(&["d1", "d2", "d3"]), 5, |_, _| {})
            .await;
        let finished = Instant::now();

        assert_eq!(records.len(), 3);
        let delay = Duration::from_millis(40);
        let times = calls.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= delay, "no pause between units");
        assert!(times[2] - times[1] >= delay, "no pause between units");
        assert!(finished - times[2] < delay, "paused after the final unit");
    }

    #[tokio::test]
    async fn question_batches_drive_a_tracked_job_to_completion() {
        let (chunks, pages) = three_document_fixture();
        let aggregator = aggregator(chunks, pages);
        let tracker = JobTracker::new();
        let job_id = tracker.create(JobKind::QuestionBatch, "questions.txt");
        tracker.start(job_id);

        let records = aggregator
            .run_question_batch(
                &["q1".to_string(), "q2".to_string()],
                &docs(&["d1", "d3"]),
                5,
                |current, total| tracker.set_progress(job_id, ((current * 100) / total) as u8),
            )
            .await;
        tracker.complete(job_id);

        assert_eq!(records.len(), 4);
        let job = tracker.get(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn empty_document_lists_produce_no_records() {
        let aggregator = aggregator(FakeChunkIndex::default(), FakePageIndex::default());

        let records = aggregator.search_documents("q", &[], 5).await;
        assert!(records.is_empty());

        let mut fired = false;
        let records = aggregator
            .run_question_batch(&["q1".to_string()], &[], 5, |_, _| fired = true)
            .await;
        assert!(records.is_empty());
        assert!(!fired);
    }
}
