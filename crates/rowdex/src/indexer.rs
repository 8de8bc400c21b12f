//! 🏭 RowIndexer: rows in, bulk requests out, a count at the end.
//!
//! 🎬 *[a conveyor belt of rows. a bouncer checks every ID at the door.]*
//! *[no ID? "not tonight, pal." a warning is logged. the belt keeps moving.]*
//!
//! Lifecycle, in the order you must call it:
//! 1. [`RowIndexer::open`]: validate config, optionally create the index, put the mapping,
//!    build the [`WriteBuffer`].
//! 2. [`RowIndexer::run`] once per row.
//! 3. [`RowIndexer::finish`]: drain the buffer, get the [`WriteDataResult`].
//! 4. [`RowIndexer::close`]: let go of the store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backends::DocumentStore;
use crate::buffer::WriteBuffer;
use crate::common::{Record, Row, WriteDataResult, value_to_string};
use crate::flush::BulkFlushAction;

/// 🔧 Everything the indexer needs to know about the rows it will be fed.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct IndexerConfig {
    /// 🆔 The column whose value becomes the document `_id`.
    pub id_column: String,
    /// 📋 Input columns to index, in order.
    pub values: Vec<String>,
    /// 🏷️ Field name for each entry of `values`. Same length. Duplicates coalesce.
    pub fields: Vec<String>,
    pub document_type: String,
    /// 🪣 Records per bulk request.
    #[serde(default = "default_bulk_index_size")]
    pub bulk_index_size: usize,
    /// 🏗️ Create the index on open if it does not exist.
    #[serde(default)]
    pub create_index: bool,
    /// 📅 Let the cluster guess which strings are dates. Off by default, because it guesses wrong.
    #[serde(default)]
    pub automatic_date_detection: bool,
    /// ⏱️ Wait before the single retry when no node is available.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_bulk_index_size() -> usize {
    2000
}

fn default_retry_delay_ms() -> u64 {
    100
}

impl IndexerConfig {
    /// 🔧 Minimal config: id column, value columns indexed under their own names.
    pub fn new(
        id_column: impl Into<String>,
        values: Vec<String>,
        document_type: impl Into<String>,
    ) -> Self {
        Self {
            id_column: id_column.into(),
            fields: values.clone(),
            values,
            document_type: document_type.into(),
            bulk_index_size: default_bulk_index_size(),
            create_index: false,
            automatic_date_detection: false,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bulk_index_size == 0 {
            anyhow::bail!(
                "💀 bulk_index_size must be positive. Zero-document bulk requests are just HTTP overhead."
            );
        }
        if self.values.len() != self.fields.len() {
            anyhow::bail!(
                "💀 {} value columns but {} field names. Every column needs exactly one field name.",
                self.values.len(),
                self.fields.len()
            );
        }
        if self.id_column.trim().is_empty() {
            anyhow::bail!("💀 id_column is empty. Documents without IDs are just vibes.");
        }
        if self.document_type.trim().is_empty() {
            anyhow::bail!("💀 document_type is empty.");
        }
        Ok(())
    }
}

/// 🏭 Pushes rows into a store through a bounded bulk buffer.
#[derive(Debug)]
pub struct RowIndexer<S: DocumentStore + 'static> {
    config: IndexerConfig,
    store: Arc<S>,
    buffer: WriteBuffer<Record, BulkFlushAction<S>>,
    skipped: u64,
}

impl<S: DocumentStore + 'static> RowIndexer<S> {
    /// 🚀 Validate, prepare the index, build the buffer.
    pub async fn open(config: IndexerConfig, store: Arc<S>) -> Result<Self> {
        config.validate().context("💀 Indexer config did not pass inspection.")?;

        if config.create_index {
            store
                .ensure_index()
                .await
                .context("💀 Could not make sure the target index exists.")?;
        }
        store
            .put_mapping(&config.document_type, config.automatic_date_detection)
            .await
            .context("💀 Could not put the mapping on the target index.")?;

        let flush_action = BulkFlushAction::new(
            Arc::clone(&store),
            config.fields.clone(),
            config.document_type.clone(),
        )
        .with_retry_delay(Duration::from_millis(config.retry_delay_ms));
        let buffer = WriteBuffer::new(config.bulk_index_size, flush_action)?;

        info!(
            "🏭 Indexer open: {} columns, bulks of {}",
            config.values.len(),
            config.bulk_index_size
        );
        Ok(Self {
            config,
            store,
            buffer,
            skipped: 0,
        })
    }

    /// 📥 Index one row. Rows without an ID are skipped with a warning, not an error.
    pub async fn run(&mut self, row: &Row) -> Result<()> {
        let Some(id) = row.get(&self.config.id_column).and_then(value_to_string) else {
            warn!("⚠️ Skipping record because ID is null: {:?}", row);
            self.skipped += 1;
            return Ok(());
        };

        let values: Vec<Value> = self
            .config
            .values
            .iter()
            .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
            .collect();

        self.buffer.add(Record::new(id, values)).await
    }

    /// 🏁 Flush the remainder and report.
    pub async fn finish(&mut self) -> Result<WriteDataResult> {
        self.buffer.drain().await?;
        let result = WriteDataResult {
            written: self.buffer.accepted_count(),
            updated: 0,
            errors: 0,
            skipped: self.skipped,
            flushes: self.buffer.flush_count(),
        };
        debug!("🏁 Indexer finished: {:?}", result);
        Ok(result)
    }

    /// 🗑️ Release the store. Anything still in the buffer is NOT flushed; call `finish` first.
    pub async fn close(self) -> Result<()> {
        if !self.buffer.is_empty() {
            warn!(
                "⚠️ Closing the indexer with {} unflushed records. They were never sent.",
                self.buffer.len()
            );
        }
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryStore;
    use serde_json::json;

    fn config(bulk_index_size: usize) -> IndexerConfig {
        IndexerConfig {
            bulk_index_size,
            ..IndexerConfig::new(
                "id",
                vec!["col1".to_string(), "col2".to_string()],
                "person",
            )
        }
    }

    #[tokio::test]
    async fn the_one_where_four_hundred_rows_become_four_hundred_documents() -> Result<()> {
        let store = InMemoryStore::new();
        let mut indexer = RowIndexer::open(config(2000), Arc::new(store.clone())).await?;

        for i in 0..200 {
            let first = Row::default()
                .with("col1", format!("foo{i}"))
                .with("col2", "bar")
                .with("id", format!("id_{i}"));
            let second = Row::default()
                .with("col1", format!("foobar{i}"))
                .with("col2", "baz")
                .with("id", format!("key_{i}"));
            indexer.run(&first).await?;
            indexer.run(&second).await?;
        }

        let result = indexer.finish().await?;
        assert_eq!(result.written, 400);
        assert_eq!(result.flushes, 1);
        assert_eq!(store.document_count().await, 400);
        assert_eq!(
            store.document("key_7").await,
            Some(json!({"col1": "foobar7", "col2": "baz"}).as_object().cloned().unwrap_or_default())
        );
        indexer.close().await?;
        assert!(store.is_closed().await);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_rows_without_ids_are_shown_the_door() -> Result<()> {
        let store = InMemoryStore::new();
        let mut indexer = RowIndexer::open(config(2), Arc::new(store.clone())).await?;

        indexer.run(&Row::default().with("col1", "a").with("id", "1")).await?;
        indexer.run(&Row::default().with("col1", "ghost")).await?;
        indexer.run(&Row::default().with("col1", "also ghost").with("id", Value::Null)).await?;
        indexer.run(&Row::default().with("col1", "b").with("id", 2)).await?;

        let result = indexer.finish().await?;
        assert_eq!(result.written, 2);
        assert_eq!(result.skipped, 2);
        let received = store.received().await;
        assert_eq!(received.len(), 1);
        let ids: Vec<&str> = received[0].operations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"], "numeric ids are stringified, ghosts never arrive");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_open_prepares_the_index() -> Result<()> {
        let store = InMemoryStore::new();
        let cfg = IndexerConfig {
            create_index: true,
            automatic_date_detection: true,
            ..config(10)
        };
        let indexer = RowIndexer::open(cfg, Arc::new(store.clone())).await?;
        assert!(store.index_created().await);
        assert_eq!(store.date_detection().await, Some(true));
        indexer.close().await?;

        let other = InMemoryStore::new();
        RowIndexer::open(config(10), Arc::new(other.clone())).await?;
        assert!(!other.index_created().await, "create_index=false leaves the index alone");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_bad_configs_never_open() {
        let store = Arc::new(InMemoryStore::new());
        assert!(RowIndexer::open(config(0), Arc::clone(&store)).await.is_err());

        let lopsided = IndexerConfig {
            fields: vec!["only_one".to_string()],
            ..config(10)
        };
        assert!(RowIndexer::open(lopsided, store).await.is_err());
    }

    #[test]
    fn the_one_where_the_config_defaults_show_up() -> Result<()> {
        let cfg: IndexerConfig = serde_json::from_value(json!({
            "id_column": "id",
            "values": ["a"],
            "fields": ["a"],
            "document_type": "thing"
        }))?;
        assert_eq!(cfg.bulk_index_size, 2000);
        assert_eq!(cfg.retry_delay_ms, 100);
        assert!(!cfg.create_index);
        assert!(!cfg.automatic_date_detection);
        Ok(())
    }
}
