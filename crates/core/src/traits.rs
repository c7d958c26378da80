use crate::{BatchOutcome, ChildChunk, ChunkHit, ParentPage, SearchError};
use async_trait::async_trait;

#[async_trait]
pub trait PageIndex {
    async fn insert_pages(&self, batch: &[ParentPage]) -> Result<BatchOutcome, SearchError>;

    async fn fetch_page(
        &self,
        document_id: &str,
        page: u32,
    ) -> Result<Option<ParentPage>, SearchError>;
}

#[async_trait]
pub trait ChunkIndex {
    async fn insert_chunks(&self, batch: &[ChildChunk]) -> Result<BatchOutcome, SearchError>;

    async fn hybrid_search(
        &self,
        query: &str,
        document_ids: &[String],
        limit: usize,
    ) -> Result<Vec<ChunkHit>, SearchError>;
}
