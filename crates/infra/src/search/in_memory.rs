use std::collections::BTreeMap;
use std::sync::RwLock;

use stockorder_core::OrderId;

use super::{IndexSettings, OrderDocument, SearchError, SearchIndex, SearchPage, SearchQuery};

#[derive(Debug, Default)]
struct State {
    settings: Option<IndexSettings>,
    documents: BTreeMap<OrderId, OrderDocument>,
}

/// In-memory order index.
///
/// Intended for tests/dev. Matching is case-insensitive: every whitespace
/// separated term of the input must occur in some item's product name or
/// description. Queries fail until settings have been declared, like a fresh
/// Meilisearch index rejecting a filter on an undeclared attribute.
#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    state: RwLock<State>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(&self) -> Option<IndexSettings> {
        self.state.read().ok().and_then(|s| s.settings.clone())
    }

    pub fn document(&self, id: OrderId) -> Option<OrderDocument> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.documents.get(&id).cloned())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.documents.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> SearchError {
        SearchError::Transport("lock poisoned".to_string())
    }
}

fn matches_text(document: &OrderDocument, terms: &[String]) -> bool {
    terms.iter().all(|term| {
        document.items.iter().any(|item| {
            item.product.name.to_lowercase().contains(term)
                || item.product.description.to_lowercase().contains(term)
        })
    })
}

#[async_trait::async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn ensure_settings(&self, settings: &IndexSettings) -> Result<(), SearchError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        state.settings = Some(settings.clone());
        Ok(())
    }

    async fn document_count(&self) -> Result<u64, SearchError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.documents.len() as u64)
    }

    async fn upsert(&self, documents: &[OrderDocument]) -> Result<(), SearchError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        for doc in documents {
            state.documents.insert(doc.id, doc.clone());
        }
        Ok(())
    }

    async fn delete(&self, id: OrderId) -> Result<(), SearchError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        state.documents.remove(&id);
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, SearchError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        if state.settings.is_none() {
            return Err(SearchError::NotConfigured(
                "created_at_ms is not filterable".to_string(),
            ));
        }

        let terms: Vec<String> = query
            .input
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let matched: Vec<&OrderDocument> = state
            .documents
            .values()
            .filter(|d| query.in_window(d.created_at_ms))
            .filter(|d| matches_text(d, &terms))
            .collect();

        Ok(SearchPage {
            estimated_total: matched.len() as u64,
            hits: matched
                .into_iter()
                .skip(query.offset as usize)
                .take(query.limit as usize)
                .cloned()
                .collect(),
            limit: query.limit,
            offset: query.offset,
        })
    }
}
