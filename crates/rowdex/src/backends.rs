//! 🔌 Backends: where the documents actually go.
//!
//! 🚰 The flush action builds the bulk request, a backend ships it. One backend talks HTTP
//! to a real Elasticsearch cluster, the other keeps everything in RAM so tests (and dry runs)
//! can see exactly what would have been sent.
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait ([`DocumentStore`]) → concrete impls → [`StoreBackend`] enum → `from_config`.
//! - The one error a caller must tell apart from the rest is [`StoreError::NoNodeAvailable`].
//!   It travels inside `anyhow::Error`; [`is_no_node_available`] digs it out of the chain.
//!
//! 🦆 The duck is here because every file must have one. This is law.

pub mod elasticsearch;
pub mod in_mem;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::app_config::StoreConfig;

pub use elasticsearch::{ElasticsearchConfig, ElasticsearchStore};
pub use in_mem::{InMemoryStore, ScriptedOutcome};

// ===== Errors =====

/// 🏷️ Store failures that callers need to react to differently.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 📡 Every configured host refused the connection. The transient one. Worth one retry.
    #[error("💀 No Elasticsearch node available. Tried: {}", hosts.join(", "))]
    NoNodeAvailable { hosts: Vec<String> },
    /// 💀 The bulk call landed, but the store rejected at least one document.
    #[error("💀 Bulk request reported document failures: {message}")]
    BulkFailures { message: String },
}

/// 🔍 Does this error (or anything it wraps) say "no node available"?
pub fn is_no_node_available(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<StoreError>(),
            Some(StoreError::NoNodeAvailable { .. })
        )
    })
}

// ===== Bulk request / response =====

/// 📦 One index operation: put `source` at `id`, overwriting whatever lived there.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOperation {
    pub id: String,
    pub source: Map<String, Value>,
}

/// 📦 A whole batch of index operations destined for one bulk call.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRequest {
    pub document_type: String,
    pub operations: Vec<IndexOperation>,
}

impl BulkRequest {
    pub fn new(document_type: impl Into<String>) -> Self {
        Self {
            document_type: document_type.into(),
            operations: Vec::new(),
        }
    }

    pub fn add(&mut self, id: impl Into<String>, source: Map<String, Value>) {
        self.operations.push(IndexOperation {
            id: id.into(),
            source,
        });
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// 📋 Per-document outcome of a bulk call.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub index: Option<String>,
    pub document_type: Option<String>,
    pub id: Option<String>,
    pub status: u16,
    /// 💀 `Some(reason)` when the store rejected this document.
    pub failure: Option<String>,
}

/// 📋 The store's verdict on a bulk call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    pub took_ms: u64,
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    /// ⚠️ True if even one document was rejected. One bad apple, whole barrel, etc.
    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|item| item.failure.is_some())
    }

    /// 📜 All rejections in one message, one line per failed item, position first.
    pub fn build_failure_message(&self) -> String {
        let mut message = String::from("failure in bulk execution:");
        for (position, item) in self.items.iter().enumerate() {
            if let Some(ref failure) = item.failure {
                message.push_str(&format!(
                    "\n[{}]: index [{}], type [{}], id [{}], message [{}]",
                    position,
                    item.index.as_deref().unwrap_or(""),
                    item.document_type.as_deref().unwrap_or(""),
                    item.id.as_deref().unwrap_or(""),
                    failure
                ));
            }
        }
        message
    }
}

// ===== Lookup / search shapes =====

/// 📄 A document fetched back out of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub source: Map<String, Value>,
}

/// 🔍 A single-hit full-text query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    /// 🏚️ Only consulted by stores that still address documents by type.
    pub document_type: String,
    /// 🎯 `None` searches every field.
    pub field: Option<String>,
    pub analyzer: Option<String>,
}

// ===== Store trait and backend enum =====

/// 🗄️ Everything the components need from a document store.
///
/// # Contract
/// - `bulk` is one network call. It returns `Err` when the call itself failed and
///   `Ok(response)` when it landed, even if `response.has_failures()`. Judging is the
///   flush action's job.
/// - Connection-level failure on every host is reported as [`StoreError::NoNodeAvailable`].
#[async_trait]
pub trait DocumentStore: std::fmt::Debug + Send + Sync {
    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse>;

    /// 🏗️ Create the target index if it doesn't exist yet.
    async fn ensure_index(&self) -> Result<()>;

    /// 🗺️ Set the index mapping's `date_detection` flag.
    async fn put_mapping(&self, document_type: &str, date_detection: bool) -> Result<()>;

    /// 📄 Fetch one document by type and id, keeping only `fields` of its source.
    /// `None` if absent. An empty `fields` keeps the whole source.
    async fn get_document(
        &self,
        document_type: &str,
        id: &str,
        fields: &[String],
    ) -> Result<Option<Document>>;

    /// 🔍 Best single hit for `query`, if any.
    async fn search_first(&self, query: &SearchQuery) -> Result<Option<Document>>;

    /// 🗑️ Release whatever the store holds on to.
    async fn close(&self) -> Result<()>;
}

/// 🎭 The many faces of a store, resolved from config.
#[derive(Debug)]
pub enum StoreBackend {
    Elasticsearch(ElasticsearchStore),
    InMemory(InMemoryStore),
}

impl StoreBackend {
    /// 🔧 Resolve and connect the configured store.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        Ok(match config {
            StoreConfig::Elasticsearch(es) => {
                let store = ElasticsearchStore::new(es.clone())?;
                store.ping().await?;
                Self::Elasticsearch(store)
            }
            StoreConfig::InMemory(_) => Self::InMemory(InMemoryStore::new()),
        })
    }
}

#[async_trait]
impl DocumentStore for StoreBackend {
    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse> {
        match self {
            Self::Elasticsearch(store) => store.bulk(request).await,
            Self::InMemory(store) => store.bulk(request).await,
        }
    }

    async fn ensure_index(&self) -> Result<()> {
        match self {
            Self::Elasticsearch(store) => store.ensure_index().await,
            Self::InMemory(store) => store.ensure_index().await,
        }
    }

    async fn put_mapping(&self, document_type: &str, date_detection: bool) -> Result<()> {
        match self {
            Self::Elasticsearch(store) => store.put_mapping(document_type, date_detection).await,
            Self::InMemory(store) => store.put_mapping(document_type, date_detection).await,
        }
    }

    async fn get_document(
        &self,
        document_type: &str,
        id: &str,
        fields: &[String],
    ) -> Result<Option<Document>> {
        match self {
            Self::Elasticsearch(store) => store.get_document(document_type, id, fields).await,
            Self::InMemory(store) => store.get_document(document_type, id, fields).await,
        }
    }

    async fn search_first(&self, query: &SearchQuery) -> Result<Option<Document>> {
        match self {
            Self::Elasticsearch(store) => store.search_first(query).await,
            Self::InMemory(store) => store.search_first(query).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            Self::Elasticsearch(store) => store.close().await,
            Self::InMemory(store) => store.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn item(id: &str, failure: Option<&str>) -> BulkItem {
        BulkItem {
            index: Some("people".into()),
            document_type: Some("person".into()),
            id: Some(id.into()),
            status: if failure.is_some() { 400 } else { 201 },
            failure: failure.map(String::from),
        }
    }

    #[test]
    fn the_one_where_one_bad_apple_spoils_the_response() {
        let response = BulkResponse {
            took_ms: 3,
            items: vec![
                item("a", None),
                item("b", Some("mapper_parsing_exception")),
                item("c", None),
            ],
        };
        assert!(response.has_failures());
        assert_eq!(
            response.build_failure_message(),
            "failure in bulk execution:\n[1]: index [people], type [person], id [b], \
             message [mapper_parsing_exception]"
        );
    }

    #[test]
    fn the_one_where_a_clean_response_has_nothing_to_say() {
        let response = BulkResponse {
            took_ms: 1,
            items: vec![item("a", None)],
        };
        assert!(!response.has_failures());
        assert_eq!(response.build_failure_message(), "failure in bulk execution:");
    }

    #[test]
    fn the_one_where_no_node_available_survives_context_wrapping() {
        let err: anyhow::Error = StoreError::NoNodeAvailable {
            hosts: vec!["http://localhost:9200".into()],
        }
        .into();
        let wrapped = Err::<(), _>(err)
            .context("layer one")
            .context("layer two")
            .unwrap_err();
        assert!(is_no_node_available(&wrapped));

        let other = anyhow::anyhow!("something else entirely");
        assert!(!is_no_node_available(&other));
    }
}
