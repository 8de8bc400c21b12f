//! 🔍 FullTextSearch: one query per row, keep the best hit.
//!
//! Output is two columns: the top hit's document id and its source. Empty input or no hits
//! gives `(None, None)`.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::trace;

use crate::backends::{DocumentStore, SearchQuery};
use crate::common::Row;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SearchConfig {
    /// 📝 Column holding the text to search for.
    pub search_column: String,
    /// 🏷️ Type the documents were indexed under.
    pub document_type: String,
    /// 🎯 Field to match against. Unset means every field.
    #[serde(default)]
    pub search_field: Option<String>,
    #[serde(default)]
    pub analyzer: Option<String>,
}

/// 📦 The best hit for one row, or nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub document_id: Option<String>,
    pub document: Option<Map<String, Value>>,
}

#[derive(Debug)]
pub struct FullTextSearch<S: DocumentStore> {
    config: SearchConfig,
    store: Arc<S>,
}

impl<S: DocumentStore> FullTextSearch<S> {
    pub fn new(config: SearchConfig, store: Arc<S>) -> Self {
        Self { config, store }
    }

    pub async fn transform(&self, row: &Row) -> Result<SearchOutcome> {
        let text = match row.get(&self.config.search_column) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => return Ok(SearchOutcome::default()),
        };

        // -- 🧹 empty strings in config mean "not set", same as leaving them out
        let query = SearchQuery {
            text,
            document_type: self.config.document_type.clone(),
            field: self.config.search_field.clone().filter(|f| !f.is_empty()),
            analyzer: self.config.analyzer.clone().filter(|a| !a.is_empty()),
        };
        trace!("🔍 searching for {:?}", query);

        let hit = self
            .store
            .search_first(&query)
            .await
            .context(format!("💀 Full-text search for '{}' failed.", query.text))?;
        Ok(match hit {
            Some(document) => SearchOutcome {
                document_id: Some(document.id),
                document: Some(document.source),
            },
            None => SearchOutcome::default(),
        })
    }

    pub async fn close(self) -> Result<()> {
        self.store.close().await
    }
}
