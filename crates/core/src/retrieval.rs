use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::error::SearchError;
use crate::models::{ChunkHit, ParentPage, RetrievalHit};
use crate::traits::{ChunkIndex, PageIndex};

const KEYWORD_PROBE_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub oversample_floor: usize,
    pub oversample_multiplier: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            oversample_floor: 20,
            oversample_multiplier: 4,
        }
    }
}

/// Answers a question against the chunk index, then swaps every winning
/// chunk for the full page it came from.
pub struct RetrievalEngine<C, P>
where
    C: ChunkIndex,
    P: PageIndex,
{
    chunks: C,
    pages: P,
    options: RetrievalOptions,
}

impl<C, P> RetrievalEngine<C, P>
where
    C: ChunkIndex + Send + Sync,
    P: PageIndex + Send + Sync,
{
    pub fn new(chunks: C, pages: P) -> Self {
        Self::with_options(chunks, pages, RetrievalOptions::default())
    }

    pub fn with_options(chunks: C, pages: P, options: RetrievalOptions) -> Self {
        Self {
            chunks,
            pages,
            options,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        document_ids: &[String],
        k: usize,
    ) -> Result<Vec<RetrievalHit>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let hits = self
            .chunks
            .hybrid_search(query, document_ids, self.oversample(k))
            .await?;
        self.resolve_and_rank(hits, k).await
    }

    /// Like `retrieve`, restricted to one document and an inclusive page range.
    pub async fn retrieve_in_range(
        &self,
        query: &str,
        document_id: &str,
        first_page: u32,
        last_page: u32,
        k: usize,
    ) -> Result<Vec<RetrievalHit>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if first_page == 0 || last_page < first_page {
            return Err(SearchError::Request(format!(
                "invalid page range {first_page}..{last_page}"
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let documents = vec![document_id.to_string()];
        let mut hits = self
            .chunks
            .hybrid_search(query, &documents, self.oversample(k))
            .await?;
        hits.retain(|hit| (first_page..=last_page).contains(&hit.page));
        self.resolve_and_rank(hits, k).await
    }

    /// Full text of specific pages, ascending, absent pages skipped.
    pub async fn fetch_pages(
        &self,
        document_id: &str,
        pages: &[u32],
    ) -> Result<Vec<ParentPage>, SearchError> {
        let mut wanted = pages.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let mut found = Vec::with_capacity(wanted.len());
        for page in wanted {
            if let Some(parent) = self.pages.fetch_page(document_id, page).await? {
                found.push(parent);
            }
        }
        Ok(found)
    }

    /// Page numbers surfaced by a short hybrid probe per keyword, unioned.
    pub async fn pages_matching(
        &self,
        document_id: &str,
        keywords: &[String],
    ) -> Result<Vec<u32>, SearchError> {
        let documents = vec![document_id.to_string()];
        let mut pages = BTreeSet::new();

        for keyword in keywords {
            if keyword.trim().is_empty() {
                continue;
            }
            let hits = self
                .chunks
                .hybrid_search(keyword, &documents, KEYWORD_PROBE_LIMIT)
                .await?;
            pages.extend(hits.into_iter().map(|hit| hit.page));
        }

        Ok(pages.into_iter().collect())
    }

    fn oversample(&self, k: usize) -> usize {
        (k * self.options.oversample_multiplier).max(self.options.oversample_floor)
    }

    async fn resolve_and_rank(
        &self,
        hits: Vec<ChunkHit>,
        k: usize,
    ) -> Result<Vec<RetrievalHit>, SearchError> {
        let mut best: HashMap<(String, u32), f64> = HashMap::new();
        for hit in &hits {
            best.entry((hit.document_id.clone(), hit.page))
                .and_modify(|score| {
                    if hit.score > *score {
                        *score = hit.score;
                    }
                })
                .or_insert(hit.score);
        }

        let mut grouped: Vec<((String, u32), f64)> = best.into_iter().collect();
        grouped.sort_by(|left, right| left.0.cmp(&right.0));

        let mut resolved = Vec::with_capacity(grouped.len());
        for ((document_id, page), score) in grouped {
            match self.pages.fetch_page(&document_id, page).await? {
                Some(parent) => resolved.push(RetrievalHit {
                    document_id,
                    page,
                    content: parent.content,
                    filename: parent.filename,
                    score,
                }),
                None => {
                    warn!(document = %document_id, page, "chunk has no parent page, dropping hit")
                }
            }
        }

        resolved.sort_by(|left, right| {
            right.score.total_cmp(&left.score).then_with(|| {
                (left.document_id.as_str(), left.page).cmp(&(right.document_id.as_str(), right.page))
            })
        });
        resolved.truncate(k);
        Ok(resolved)
    }
}
