use chrono::Utc;
use clap::{Parser, Subcommand};
use report_search_core::{
    build_document_fingerprint, ingest_folder, AggregationOptions, IngestProgress,
    IngestionOptions, IngestionPipeline, JobKind, JobProgress, JobTracker, LopdfExtractor,
    MultiQueryAggregator, PdfExtractor, ProgressReporter, RetrievalEngine, RetrievalHit,
    WeaviateStore,
};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "report-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Weaviate base URL
    #[arg(long, default_value = "http://localhost:8080")]
    search_url: String,

    /// Class holding full report pages
    #[arg(long, default_value = "ReportPage")]
    parent_class: String,

    /// Class holding searchable chunks
    #[arg(long, default_value = "ReportChunk")]
    chunk_class: String,

    /// Bearer token for the search backend
    #[arg(long, env = "SEARCH_API_KEY")]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, fingerprint, and index a PDF report (or a folder of them).
    Ingest {
        /// PDF file to ingest.
        file: Option<String>,
        /// Ingest every PDF under this folder instead of a single file.
        #[arg(long)]
        folder: Option<String>,
        /// Document id; defaults to a prefix of the content checksum.
        #[arg(long)]
        document_id: Option<String>,
        #[arg(long)]
        company_id: Option<String>,
        #[arg(long)]
        company_name: Option<String>,
        /// Report kind, e.g. annual or quarterly.
        #[arg(long)]
        report_type: Option<String>,
        #[arg(long)]
        reporting_year: Option<i32>,
        /// Maximum chunk length in characters.
        #[arg(long, default_value = "1000")]
        chunk_size: usize,
        /// Characters shared between neighbouring window chunks.
        #[arg(long, default_value = "200")]
        chunk_overlap: usize,
        #[arg(long, default_value = "50")]
        parent_batch_size: usize,
        #[arg(long, default_value = "100")]
        child_batch_size: usize,
        /// How often a batch with failed items is retried whole.
        #[arg(long, default_value = "3")]
        max_batch_retries: u32,
        /// Pause between batches in milliseconds.
        #[arg(long, default_value = "100")]
        batch_delay_ms: u64,
    },
    /// Retrieve the best-matching report pages for a question.
    Search {
        /// The question to search with.
        query: String,
        /// Restrict to these document ids; repeatable.
        #[arg(long)]
        document: Vec<String>,
        /// Number of pages to return.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// One result record per document instead of one merged list.
        #[arg(long, default_value_t = false)]
        per_document: bool,
        /// First page of an inclusive range filter (needs one --document).
        #[arg(long)]
        first_page: Option<u32>,
        /// Last page of an inclusive range filter.
        #[arg(long)]
        last_page: Option<u32>,
    },
    /// Run a file of questions (one per line) against the given documents.
    Ask {
        /// Text file with one question per line.
        questions_file: String,
        /// Document ids to answer from; repeatable.
        #[arg(long)]
        document: Vec<String>,
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Pause between questions in milliseconds.
        #[arg(long, default_value = "200")]
        question_delay_ms: u64,
    },
    /// Print full page text for specific pages of one document.
    Pages {
        /// Document id the pages belong to.
        document_id: String,
        /// Page number to fetch; repeatable.
        #[arg(long)]
        page: Vec<u32>,
        /// Instead of fetching, list page numbers matching these keywords.
        #[arg(long)]
        matching: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = build_store(&cli)?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        search_url = %cli.search_url,
        "report-search boot"
    );

    match cli.command {
        Command::Ingest {
            file,
            folder,
            document_id,
            company_id,
            company_name,
            report_type,
            reporting_year,
            chunk_size,
            chunk_overlap,
            parent_batch_size,
            child_batch_size,
            max_batch_retries,
            batch_delay_ms,
        } => {
            let options = IngestionOptions {
                chunk_size,
                chunk_overlap,
                parent_batch_size,
                child_batch_size,
                max_batch_retries,
                batch_delay_ms,
                ..IngestionOptions::default()
            };

            store
                .ensure_schema()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let pipeline = IngestionPipeline::new(store.clone(), store.clone(), options);

            match (file, folder) {
                (Some(file), None) => {
                    let path = Path::new(&file);
                    let bytes = tokio::fs::read(path).await?;
                    let mut fingerprint = build_document_fingerprint(path, &bytes, document_id)
                        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                    fingerprint.company_id = company_id;
                    fingerprint.company_name = company_name;
                    fingerprint.report_type = report_type;
                    fingerprint.reporting_year = reporting_year;

                    let pages = LopdfExtractor
                        .extract_pages(&bytes)
                        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

                    let tracker = JobTracker::new();
                    let job_id =
                        tracker.create(JobKind::Ingestion, fingerprint.document_id.clone());
                    tracker.start(job_id);
                    let reporter = JobProgress::new(tracker.clone(), job_id);
                    reporter.report(IngestProgress::Extracted { pages: pages.len() });

                    let outcome = pipeline.ingest(&fingerprint, &pages, &reporter).await;
                    match &outcome {
                        Ok(report) => {
                            tracker.complete(job_id);
                            println!("{}", serde_json::to_string_pretty(report)?);
                        }
                        Err(error) => tracker.fail(job_id, error.to_string()),
                    }
                    if let Some(job) = tracker.get(job_id) {
                        println!("{}", serde_json::to_string_pretty(&job)?);
                    }
                    outcome.map_err(|error| anyhow::anyhow!(error.to_string()))?;
                }
                (None, Some(folder)) => {
                    let report = ingest_folder(&pipeline, Path::new(&folder))
                        .await
                        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

                    for (path, item) in &report.ingested {
                        println!(
                            "{}: pages={} chunks_inserted={} chunks_failed={}",
                            path.display(),
                            item.pages_processed,
                            item.chunks_inserted,
                            item.chunks_failed
                        );
                    }
                    for skipped in &report.skipped {
                        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                    }
                    println!(
                        "{} ingested, {} skipped",
                        report.ingested.len(),
                        report.skipped.len()
                    );
                }
                _ => return Err(anyhow::anyhow!("pass a pdf file or --folder, not both")),
            }
        }
        Command::Search {
            query,
            document,
            top_k,
            per_document,
            first_page,
            last_page,
        } => {
            let engine = RetrievalEngine::new(store.clone(), store.clone());

            if per_document {
                let aggregator = MultiQueryAggregator::new(engine);
                let records = aggregator.search_documents(&query, &document, top_k).await;
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if first_page.is_some() || last_page.is_some() {
                let (first, last) = match (first_page, last_page) {
                    (Some(first), Some(last)) => (first, last),
                    _ => return Err(anyhow::anyhow!("--first-page and --last-page go together")),
                };
                if document.len() != 1 {
                    return Err(anyhow::anyhow!("page ranges need exactly one --document"));
                }
                let hits = engine
                    .retrieve_in_range(&query, &document[0], first, last, top_k)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                print_hits(&hits);
            } else {
                let hits = engine
                    .retrieve(&query, &document, top_k)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                print_hits(&hits);
            }
        }
        Command::Ask {
            questions_file,
            document,
            top_k,
            question_delay_ms,
        } => {
            let contents = tokio::fs::read_to_string(Path::new(&questions_file)).await?;
            let questions: Vec<String> = contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect();
            if questions.is_empty() {
                return Err(anyhow::anyhow!("no questions in {questions_file}"));
            }
            if document.is_empty() {
                return Err(anyhow::anyhow!("pass at least one --document"));
            }

            let engine = RetrievalEngine::new(store.clone(), store.clone());
            let aggregator = MultiQueryAggregator::with_options(
                engine,
                AggregationOptions {
                    question_delay_ms,
                    ..AggregationOptions::default()
                },
            );

            let tracker = JobTracker::new();
            let job_id = tracker.create(JobKind::QuestionBatch, questions_file);
            tracker.start(job_id);

            let records = aggregator
                .run_question_batch(&questions, &document, top_k, |current, total| {
                    tracker.set_progress(job_id, ((current * 100) / total) as u8);
                    println!("progress: {current}/{total}");
                })
                .await;
            tracker.complete(job_id);

            println!("{}", serde_json::to_string_pretty(&records)?);
            for job in tracker.list() {
                println!("{}", serde_json::to_string_pretty(&job)?);
            }
        }
        Command::Pages {
            document_id,
            page,
            matching,
        } => {
            let engine = RetrievalEngine::new(store.clone(), store.clone());

            if !matching.is_empty() {
                let numbers = engine
                    .pages_matching(&document_id, &matching)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                println!("pages: {numbers:?}");
            } else {
                if page.is_empty() {
                    return Err(anyhow::anyhow!("pass --page at least once, or --matching"));
                }
                let pages = engine
                    .fetch_pages(&document_id, &page)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                for parent in pages {
                    println!("[page {}] file={}", parent.page, parent.filename);
                    println!("{}", parent.content);
                }
            }
        }
    }

    Ok(())
}

fn build_store(cli: &Cli) -> anyhow::Result<WeaviateStore> {
    let mut store = WeaviateStore::new(&cli.search_url, &cli.parent_class, &cli.chunk_class)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    if let Some(api_key) = &cli.api_key {
        store = store.with_api_key(api_key);
    }
    Ok(store)
}

fn print_hits(hits: &[RetrievalHit]) {
    if hits.is_empty() {
        println!("no matching pages");
        return;
    }
    for hit in hits {
        println!(
            "[{} p.{}] score={:.4} file={}",
            hit.document_id, hit.page, hit.score, hit.filename
        );
        println!("{}", hit.content);
    }
}
