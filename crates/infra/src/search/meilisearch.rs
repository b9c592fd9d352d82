//! Meilisearch adapter over its REST API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `ensure_settings` | `PATCH /indexes/{uid}/settings` |
//! | `document_count` | `GET /indexes/{uid}/stats` (404 counts as empty) |
//! | `upsert` | `POST /indexes/{uid}/documents?primaryKey=id` |
//! | `delete` | `DELETE /indexes/{uid}/documents/{id}` |
//! | `search` | `POST /indexes/{uid}/search` |
//!
//! Writes are asynchronous tasks on the Meilisearch side; a 202 means queued.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use stockorder_core::OrderId;

use super::{IndexSettings, OrderDocument, SearchError, SearchIndex, SearchPage, SearchQuery};

#[derive(Debug, Clone)]
pub struct MeilisearchIndex {
    client: Client,
    base_url: String,
    index: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    number_of_documents: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    hits: Vec<OrderDocument>,
    #[serde(default)]
    estimated_total_hits: Option<u64>,
}

impl MeilisearchIndex {
    pub fn new(base_url: impl Into<String>, index: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(Client::new(), base_url, index, api_key)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        index: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: index.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/indexes/{}{}", self.base_url, self.index, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SearchError> {
        self.authorized(request)
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))
    }
}

async fn ensure_success(response: Response) -> Result<Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait::async_trait]
impl SearchIndex for MeilisearchIndex {
    #[instrument(skip(self, settings), fields(index = %self.index), err)]
    async fn ensure_settings(&self, settings: &IndexSettings) -> Result<(), SearchError> {
        let response = self
            .send(self.client.patch(self.url("/settings")).json(settings))
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    #[instrument(skip(self), fields(index = %self.index), err)]
    async fn document_count(&self) -> Result<u64, SearchError> {
        let response = self.send(self.client.get(self.url("/stats"))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let stats: StatsResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))?;
        Ok(stats.number_of_documents)
    }

    #[instrument(skip(self, documents), fields(index = %self.index, documents = documents.len()), err)]
    async fn upsert(&self, documents: &[OrderDocument]) -> Result<(), SearchError> {
        if documents.is_empty() {
            return Ok(());
        }
        let response = self
            .send(
                self.client
                    .post(self.url("/documents"))
                    .query(&[("primaryKey", "id")])
                    .json(documents),
            )
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    #[instrument(skip(self), fields(index = %self.index, order_id = %id), err)]
    async fn delete(&self, id: OrderId) -> Result<(), SearchError> {
        let response = self
            .send(self.client.delete(self.url(&format!("/documents/{id}"))))
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    #[instrument(skip(self, query), fields(index = %self.index, limit = query.limit, offset = query.offset), err)]
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, SearchError> {
        let mut body = json!({
            "q": query.input,
            "limit": query.limit,
            "offset": query.offset,
        });
        if let Some(filter) = query.filter_expression() {
            body["filter"] = json!(filter);
        }

        let response = self
            .send(self.client.post(self.url("/search")).json(&body))
            .await?;
        let parsed: SearchResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))?;

        let estimated_total = parsed
            .estimated_total_hits
            .unwrap_or(parsed.hits.len() as u64);
        Ok(SearchPage {
            hits: parsed.hits,
            estimated_total,
            limit: query.limit,
            offset: query.offset,
        })
    }
}
