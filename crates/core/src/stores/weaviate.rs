use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::models::{BatchOutcome, ChildChunk, ChunkHit, FailedInsert, ParentPage};
use crate::traits::{ChunkIndex, PageIndex};
use crate::SearchError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for a Weaviate deployment holding the two report
/// collections: full pages (no vectorizer) and chunks (vectorized
/// server-side, searched with the hybrid operator).
#[derive(Clone)]
pub struct WeaviateStore {
    client: Arc<Client>,
    endpoint: String,
    parent_class: String,
    chunk_class: String,
    api_key: Option<String>,
}

impl WeaviateStore {
    pub fn new(
        endpoint: impl Into<String>,
        parent_class: impl Into<String>,
        chunk_class: impl Into<String>,
    ) -> Result<Self, SearchError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            parent_class: parent_class.into(),
            chunk_class: chunk_class.into(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), SearchError> {
        let parent = self.parent_class_definition();
        self.ensure_class(&self.parent_class, parent).await?;
        let chunk = self.chunk_class_definition();
        self.ensure_class(&self.chunk_class, chunk).await
    }

    async fn ensure_class(&self, class: &str, definition: Value) -> Result<(), SearchError> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/v1/schema/{}", self.endpoint, class)),
            )
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(SearchError::BackendResponse {
                backend: "weaviate".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .authorize(self.client.post(format!("{}/v1/schema", self.endpoint)))
            .json(&definition)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "weaviate".to_string(),
                details: format!("schema setup for {class} failed with {}", response.status()),
            });
        }

        Ok(())
    }

    fn parent_class_definition(&self) -> Value {
        json!({
            "class": self.parent_class,
            "description": "Full report pages used as answer context",
            "vectorizer": "none",
            "properties": [
                {"name": "documentId", "dataType": ["text"], "tokenization": "field"},
                {"name": "documentSlug", "dataType": ["text"], "tokenization": "field"},
                {"name": "page", "dataType": ["int"]},
                {"name": "content", "dataType": ["text"]},
                {"name": "filename", "dataType": ["text"], "tokenization": "field"},
                {"name": "companyId", "dataType": ["text"], "tokenization": "field"},
                {"name": "companyName", "dataType": ["text"]},
                {"name": "reportType", "dataType": ["text"], "tokenization": "field"},
                {"name": "reportingYear", "dataType": ["int"]},
            ],
        })
    }

    fn chunk_class_definition(&self) -> Value {
        // Only `content` feeds the vectorizer; the rest is filter metadata.
        json!({
            "class": self.chunk_class,
            "description": "Sub-page chunks indexed for hybrid search",
            "vectorizer": "text2vec-openai",
            "properties": [
                {"name": "content", "dataType": ["text"]},
                {"name": "documentId", "dataType": ["text"], "tokenization": "field",
                 "moduleConfig": {"text2vec-openai": {"skip": true}}},
                {"name": "documentSlug", "dataType": ["text"], "tokenization": "field",
                 "moduleConfig": {"text2vec-openai": {"skip": true}}},
                {"name": "page", "dataType": ["int"]},
                {"name": "chunkIndex", "dataType": ["int"]},
                {"name": "filename", "dataType": ["text"], "tokenization": "field",
                 "moduleConfig": {"text2vec-openai": {"skip": true}}},
                {"name": "parentRef", "dataType": ["text"], "tokenization": "field",
                 "moduleConfig": {"text2vec-openai": {"skip": true}}},
            ],
        })
    }

    async fn insert_objects(&self, objects: Vec<Value>) -> Result<BatchOutcome, SearchError> {
        if objects.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let total = objects.len();

        let response = self
            .authorize(
                self.client
                    .post(format!("{}/v1/batch/objects", self.endpoint)),
            )
            .json(&json!({ "objects": objects }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "weaviate".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        let results = body
            .as_array()
            .ok_or_else(|| SearchError::BackendResponse {
                backend: "weaviate".to_string(),
                details: "batch response was not an array".to_string(),
            })?;

        let mut failures = Vec::new();
        for item in results {
            let status = item
                .pointer("/result/status")
                .and_then(Value::as_str)
                .unwrap_or("SUCCESS");
            if status == "SUCCESS" {
                continue;
            }

            let id = item
                .pointer("/id")
                .and_then(Value::as_str)
                .and_then(|raw| Uuid::parse_str(raw).ok())
                .unwrap_or_else(Uuid::nil);
            let reason = item
                .pointer("/result/errors/error/0/message")
                .and_then(Value::as_str)
                .unwrap_or("insert rejected")
                .to_string();
            failures.push(FailedInsert { id, reason });
        }

        Ok(BatchOutcome {
            inserted: total - failures.len(),
            failures,
        })
    }

    async fn graphql(&self, query: String) -> Result<Value, SearchError> {
        let response = self
            .authorize(self.client.post(format!("{}/v1/graphql", self.endpoint)))
            .json(&json!({ "query": query }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "weaviate".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let details = errors
                    .iter()
                    .filter_map(|error| error.pointer("/message").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(SearchError::BackendResponse {
                    backend: "weaviate".to_string(),
                    details: if details.is_empty() {
                        "graphql query failed".to_string()
                    } else {
                        details
                    },
                });
            }
        }

        Ok(body.pointer("/data").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl PageIndex for WeaviateStore {
    async fn insert_pages(&self, batch: &[ParentPage]) -> Result<BatchOutcome, SearchError> {
        let objects = batch
            .iter()
            .map(|page| {
                json!({
                    "class": self.parent_class,
                    "id": page.id,
                    "properties": {
                        "documentId": page.document_id,
                        "documentSlug": page.document_slug,
                        "page": page.page,
                        "content": page.content,
                        "filename": page.filename,
                        "companyId": page.company_id,
                        "companyName": page.company_name,
                        "reportType": page.report_type,
                        "reportingYear": page.reporting_year,
                    },
                })
            })
            .collect();

        self.insert_objects(objects).await
    }

    async fn fetch_page(
        &self,
        document_id: &str,
        page: u32,
    ) -> Result<Option<ParentPage>, SearchError> {
        let query = format!(
            "{{ Get {{ {class}(limit: 1, where: {{ operator: And, operands: [ \
             {{ path: [\"documentId\"], operator: Equal, valueText: \"{document}\" }}, \
             {{ path: [\"page\"], operator: Equal, valueInt: {page} }} ] }}) \
             {{ documentId documentSlug page content filename companyId companyName \
             reportType reportingYear _additional {{ id }} }} }} }}",
            class = self.parent_class,
            document = escape_graphql(document_id),
            page = page,
        );

        let data = self.graphql(query).await?;
        let records = data
            .pointer(&format!("/Get/{}", self.parent_class))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(records.first().map(parent_from_value))
    }
}

#[async_trait]
impl ChunkIndex for WeaviateStore {
    async fn insert_chunks(&self, batch: &[ChildChunk]) -> Result<BatchOutcome, SearchError> {
        let objects = batch
            .iter()
            .map(|chunk| {
                json!({
                    "class": self.chunk_class,
                    "id": chunk.id,
                    "properties": {
                        "content": chunk.content,
                        "documentId": chunk.document_id,
                        "documentSlug": chunk.document_slug,
                        "page": chunk.page,
                        "chunkIndex": chunk.chunk_index,
                        "filename": chunk.filename,
                        "parentRef": chunk.parent_id,
                    },
                })
            })
            .collect();

        self.insert_objects(objects).await
    }

    async fn hybrid_search(
        &self,
        query: &str,
        document_ids: &[String],
        limit: usize,
    ) -> Result<Vec<ChunkHit>, SearchError> {
        let graphql = format!(
            "{{ Get {{ {class}(limit: {limit}, hybrid: {{ query: \"{query}\" }}{filter}) \
             {{ content documentId page _additional {{ id score }} }} }} }}",
            class = self.chunk_class,
            limit = limit,
            query = escape_graphql(query),
            filter = document_filter(document_ids),
        );

        let data = self.graphql(graphql).await?;
        let records = data
            .pointer(&format!("/Get/{}", self.chunk_class))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::new();
        for record in &records {
            let id = record
                .pointer("/_additional/id")
                .and_then(Value::as_str)
                .and_then(|raw| Uuid::parse_str(raw).ok());
            let Some(id) = id else {
                warn!("dropping hybrid hit without a parseable id");
                continue;
            };

            hits.push(ChunkHit {
                id,
                document_id: text_property(record, "documentId"),
                page: record
                    .pointer("/page")
                    .and_then(Value::as_u64)
                    .unwrap_or_default() as u32,
                content: text_property(record, "content"),
                score: additional_score(record),
            });
        }

        Ok(hits)
    }
}

fn parent_from_value(value: &Value) -> ParentPage {
    ParentPage {
        id: value
            .pointer("/_additional/id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .unwrap_or_else(Uuid::nil),
        document_id: text_property(value, "documentId"),
        document_slug: text_property(value, "documentSlug"),
        page: value
            .pointer("/page")
            .and_then(Value::as_u64)
            .unwrap_or_default() as u32,
        content: text_property(value, "content"),
        filename: text_property(value, "filename"),
        company_id: optional_text(value, "companyId"),
        company_name: optional_text(value, "companyName"),
        report_type: optional_text(value, "reportType"),
        reporting_year: value
            .pointer("/reportingYear")
            .and_then(Value::as_i64)
            .map(|year| year as i32),
    }
}

fn text_property(value: &Value, name: &str) -> String {
    value
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn optional_text(value: &Value, name: &str) -> Option<String> {
    value.get(name).and_then(Value::as_str).map(str::to_string)
}

// Weaviate returns `_additional.score` as a string; older servers used a number.
fn additional_score(value: &Value) -> f64 {
    let raw = value.pointer("/_additional/score");
    raw.and_then(Value::as_str)
        .and_then(|text| text.parse::<f64>().ok())
        .or_else(|| raw.and_then(Value::as_f64))
        .unwrap_or(0.0)
}

fn document_filter(document_ids: &[String]) -> String {
    if document_ids.is_empty() {
        return String::new();
    }

    let values = document_ids
        .iter()
        .map(|id| format!("\"{}\"", escape_graphql(id)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(", where: {{ path: [\"documentId\"], operator: ContainsAny, valueText: [{values}] }}")
}

fn escape_graphql(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            '\t' => escaped.push(' '),
            other => escaped.push(other),
        }
    }
    escaped
}
