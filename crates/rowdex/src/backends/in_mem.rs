//! # Previously, on rowdex...
//!
//! 🎬 The cluster was down. Or expensive. Or simply not invited to the unit tests.
//! Someone had to pretend to be Elasticsearch. Someone with no sockets, no shards,
//! and no opinions about mappings.
//!
//! That someone was this module.
//!
//! [`InMemoryStore`] records every bulk request it receives, keeps the documents it accepted
//! in a map so lookups and searches have something to find, and can be scripted to fail in
//! the exact ways a real cluster fails: nobody home, or "I refuse this particular document".
//!
//! ⚠️ This is for tests and `--dry-run`. If you're deploying this to prod as your search
//! engine, please also deploy a therapist.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    BulkItem, BulkRequest, BulkResponse, Document, DocumentStore, SearchQuery, StoreError,
};

/// 🎭 What the next bulk call should pretend happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    /// ✅ Accept everything.
    Accept,
    /// 📡 Fail the whole call as if no node answered. Nothing is recorded.
    NoNodeAvailable,
    /// 💀 Accept the call but reject the document with this id.
    RejectDocument { id: String, reason: String },
}

/// 📦 A document store that lives and dies in RAM.
///
/// Clone-able, and every clone shares the same state, so a test can hand one copy to the
/// component under test and keep another to peek at what arrived.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    received: Arc<Mutex<Vec<BulkRequest>>>,
    documents: Arc<Mutex<BTreeMap<String, Map<String, Value>>>>,
    script: Arc<Mutex<VecDeque<ScriptedOutcome>>>,
    bulk_calls: Arc<Mutex<usize>>,
    index_created: Arc<Mutex<bool>>,
    date_detection: Arc<Mutex<Option<bool>>>,
    closed: Arc<Mutex<bool>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🎬 Queue outcomes for the next bulk calls, consumed in order.
    /// When the script runs out, every call is accepted.
    pub async fn script(&self, outcomes: impl IntoIterator<Item = ScriptedOutcome>) {
        self.script.lock().await.extend(outcomes);
    }

    /// 📋 Every bulk request that made it past the (possibly scripted) network.
    pub async fn received(&self) -> Vec<BulkRequest> {
        self.received.lock().await.clone()
    }

    /// 🔢 Bulk calls attempted, including the ones scripted to fail.
    pub async fn bulk_calls(&self) -> usize {
        *self.bulk_calls.lock().await
    }

    pub async fn document(&self, id: &str) -> Option<Map<String, Value>> {
        self.documents.lock().await.get(id).cloned()
    }

    pub async fn document_count(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn index_created(&self) -> bool {
        *self.index_created.lock().await
    }

    pub async fn date_detection(&self) -> Option<bool> {
        *self.date_detection.lock().await
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.lock().await
    }
}

// -- 🔍 does any value in this source contain `text` (case-insensitive)? poor man's analyzer.
fn value_matches(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|v| value_matches(v, needle)),
        Value::Null => false,
        other => other.to_string().to_lowercase().contains(needle),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse> {
        *self.bulk_calls.lock().await += 1;
        let outcome = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(ScriptedOutcome::Accept);

        let rejected_id = match outcome {
            ScriptedOutcome::NoNodeAvailable => {
                debug!("🎭 in-memory store pretending nobody is home");
                return Err(StoreError::NoNodeAvailable {
                    hosts: vec!["in-memory".to_string()],
                }
                .into());
            }
            ScriptedOutcome::RejectDocument { id, reason } => Some((id, reason)),
            ScriptedOutcome::Accept => None,
        };

        self.received.lock().await.push(request.clone());

        let mut documents = self.documents.lock().await;
        let mut items = Vec::with_capacity(request.len());
        for operation in &request.operations {
            let failure = match rejected_id {
                Some((ref id, ref reason)) if *id == operation.id => Some(reason.clone()),
                _ => None,
            };
            if failure.is_none() {
                documents.insert(operation.id.clone(), operation.source.clone());
            }
            items.push(BulkItem {
                index: Some("in-memory".to_string()),
                document_type: Some(request.document_type.clone()),
                id: Some(operation.id.clone()),
                status: if failure.is_some() { 400 } else { 201 },
                failure,
            });
        }

        Ok(BulkResponse { took_ms: 0, items })
    }

    async fn ensure_index(&self) -> Result<()> {
        *self.index_created.lock().await = true;
        Ok(())
    }

    async fn put_mapping(&self, _document_type: &str, date_detection: bool) -> Result<()> {
        *self.date_detection.lock().await = Some(date_detection);
        Ok(())
    }

    // -- 🏷️ one flat id space; the type is accepted and ignored
    async fn get_document(
        &self,
        _document_type: &str,
        id: &str,
        fields: &[String],
    ) -> Result<Option<Document>> {
        let documents = self.documents.lock().await;
        Ok(documents.get(id).map(|source| Document {
            id: id.to_string(),
            source: source
                .iter()
                .filter(|(field, _)| fields.is_empty() || fields.contains(field))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        }))
    }

    async fn search_first(&self, query: &SearchQuery) -> Result<Option<Document>> {
        let needle = query.text.to_lowercase();
        let documents = self.documents.lock().await;
        let hit = documents.iter().find(|(_, source)| match query.field {
            Some(ref field) => source
                .get(field)
                .is_some_and(|value| value_matches(value, &needle)),
            None => source.values().any(|value| value_matches(value, &needle)),
        });
        Ok(hit.map(|(id, source)| Document {
            id: id.clone(),
            source: source.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        *self.closed.lock().await = true;
        Ok(())
    }
}
