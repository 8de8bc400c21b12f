//! 🚽 BulkFlushAction: the thing that happens when the bucket is full.
//!
//! 🎬 *[the buffer tips over. two thousand records slide toward the network.]*
//! *[somewhere, a node is rebooting. we wait a tenth of a second. we try once more.]*
//!
//! Turns a batch of [`Record`]s into one [`BulkRequest`] and sends it as one call.
//!
//! 🧠 Knowledge graph (the failure policy, which is the whole point of this file):
//! - [`StoreError::NoNodeAvailable`] → sleep `retry_delay`, retry exactly once. Second failure
//!   propagates, whatever it is.
//! - Response with any per-document failure → the whole flush fails with the store's aggregated
//!   message. No partial acceptance. No retrying only the rejects.
//! - Anything else → fails immediately.
//!
//! ⚠️ All-or-nothing on document failures looks harsh next to a bulk API that reports per
//! document. It is harsh. It is also the contract. Do not "fix" it here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::backends::{BulkRequest, DocumentStore, StoreError, is_no_node_available};
use crate::buffer::FlushAction;
use crate::common::Record;

/// ⏱️ How long to wait before the one and only retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// 🚽 Flushes record batches into a [`DocumentStore`] as single bulk calls.
#[derive(Debug)]
pub struct BulkFlushAction<S> {
    store: Arc<S>,
    fields: Vec<String>,
    document_type: String,
    retry_delay: Duration,
}

impl<S: DocumentStore> BulkFlushAction<S> {
    pub fn new(store: Arc<S>, fields: Vec<String>, document_type: impl Into<String>) -> Self {
        Self {
            store,
            fields,
            document_type: document_type.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// 📦 One index operation per record, each source built with the coalescing field map.
    pub fn build_request(&self, batch: &[Record]) -> Result<BulkRequest> {
        let mut request = BulkRequest::new(self.document_type.clone());
        for record in batch {
            let source = record.to_field_map(&self.fields)?;
            debug!("📄 Indexing record ({}): {:?}", record.id, source);
            request.add(record.id.clone(), source);
        }
        Ok(request)
    }

    async fn execute(&self, batch: Vec<Record>) -> Result<()> {
        let request = self.build_request(&batch)?;

        let response = match self.store.bulk(&request).await {
            Ok(response) => response,
            Err(err) if is_no_node_available(&err) => {
                warn!(
                    "📡 No node available for a bulk of {} documents. Retrying once in {:?}.",
                    request.len(),
                    self.retry_delay
                );
                tokio::time::sleep(self.retry_delay).await;
                self.store
                    .bulk(&request)
                    .await
                    .context("💀 Retried the bulk request once after no node was available. Still nobody home.")?
            }
            Err(err) => return Err(err),
        };

        if response.has_failures() {
            return Err(StoreError::BulkFailures {
                message: response.build_failure_message(),
            }
            .into());
        }

        debug!(
            "✅ {} documents landed in {}ms",
            request.len(),
            response.took_ms
        );
        Ok(())
    }
}

#[async_trait]
impl<S: DocumentStore + 'static> FlushAction<Record> for BulkFlushAction<S> {
    async fn run(&mut self, batch: Vec<Record>) -> Result<()> {
        let size = batch.len();
        self.execute(batch).await.map_err(|err| {
            error!(
                "💀 Unexpected error while flushing a batch of {} records: {:#}",
                size, err
            );
            err.context(format!("💀 Flushing a batch of {size} records failed."))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryStore, ScriptedOutcome};
    use crate::buffer::WriteBuffer;
    use serde_json::{Value, json};

    fn action(store: &InMemoryStore, fields: &[&str]) -> BulkFlushAction<InMemoryStore> {
        BulkFlushAction::new(
            Arc::new(store.clone()),
            fields.iter().map(|f| f.to_string()).collect(),
            "person",
        )
        .with_retry_delay(Duration::from_millis(1))
    }

    fn record(id: &str, name: &str) -> Record {
        Record::new(id, vec![json!(name)])
    }

    #[tokio::test]
    async fn the_one_where_a_batch_becomes_one_bulk_call() -> Result<()> {
        let store = InMemoryStore::new();
        let mut flush = action(&store, &["name"]);
        flush
            .run(vec![record("a", "Ada"), record("b", "Bob")])
            .await?;

        let received = store.received().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].document_type, "person");
        let ids: Vec<&str> = received[0].operations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_shared_field_names_coalesce_in_the_request() -> Result<()> {
        let store = InMemoryStore::new();
        let flush = action(&store, &["name", "name", "age"]);
        let request = flush.build_request(&[Record::new(
            "a",
            vec![json!("Ada"), json!("Lovelace"), Value::Null],
        )])?;
        assert_eq!(request.operations[0].source["name"], json!(["Ada", "Lovelace"]));
        assert!(request.operations[0].source.get("age").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_node_comes_back_for_the_retry() -> Result<()> {
        let store = InMemoryStore::new();
        store.script([ScriptedOutcome::NoNodeAvailable]).await;
        let mut flush = action(&store, &["name"]);

        flush.run(vec![record("a", "Ada")]).await?;
        assert_eq!(store.bulk_calls().await, 2);
        assert_eq!(store.received().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_node_never_comes_back() {
        let store = InMemoryStore::new();
        store
            .script([ScriptedOutcome::NoNodeAvailable, ScriptedOutcome::NoNodeAvailable])
            .await;
        let mut flush = action(&store, &["name"]);

        let err = flush
            .run(vec![record("a", "Ada")])
            .await
            .expect_err("two strikes, out");
        assert!(is_no_node_available(&err));
        assert_eq!(store.bulk_calls().await, 2, "exactly one retry, no more");
    }

    #[tokio::test]
    async fn the_one_where_one_rejected_document_fails_the_whole_flush() {
        let store = InMemoryStore::new();
        store
            .script([ScriptedOutcome::RejectDocument {
                id: "b".into(),
                reason: "mapper_parsing_exception".into(),
            }])
            .await;
        let mut flush = action(&store, &["name"]);

        let err = flush
            .run(vec![record("a", "Ada"), record("b", "Bob"), record("c", "Cy")])
            .await
            .expect_err("a single reject fails the batch");
        let message = format!("{err:#}");
        assert!(message.contains("failure in bulk execution"));
        assert!(message.contains("id [b]"));
        assert!(message.contains("mapper_parsing_exception"));
        assert_eq!(store.bulk_calls().await, 1, "document failures are never retried");
    }

    #[tokio::test]
    async fn the_one_where_other_errors_skip_the_retry() {
        let store = InMemoryStore::new();
        let mut flush = action(&store, &["name", "extra"]);

        // -- 🐛 one value, two field names: the request can't even be built
        let result = flush.run(vec![record("a", "Ada")]).await;
        assert!(result.is_err());
        assert_eq!(store.bulk_calls().await, 0);
    }

    #[tokio::test]
    async fn the_one_where_capacity_two_meets_five_records() -> Result<()> {
        let store = InMemoryStore::new();
        let mut buffer = WriteBuffer::new(2, action(&store, &["name"]))?;
        for id in ["A", "B", "C", "D", "E"] {
            buffer.add(record(id, id)).await?;
        }
        buffer.drain().await?;

        let batches: Vec<Vec<String>> = store
            .received()
            .await
            .into_iter()
            .map(|r| r.operations.into_iter().map(|o| o.id).collect())
            .collect();
        assert_eq!(
            batches,
            vec![vec!["A", "B"], vec!["C", "D"], vec!["E"]]
                .into_iter()
                .map(|b| b.into_iter().map(String::from).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        );
        assert_eq!(buffer.accepted_count(), 5);
        Ok(())
    }
}
