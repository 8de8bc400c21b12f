//! 🔎 DocumentIdLookup: give it a row with an ID, get back the fields of that document.
//!
//! One output per configured field, `None` wherever the document or the field doesn't exist.
//! No ID in the row? All `None`, no network call.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::backends::DocumentStore;
use crate::common::{Row, value_to_string};

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LookupConfig {
    /// 🆔 Column holding the document id to look up.
    pub id_column: String,
    /// 📋 Fields to return, in output order.
    pub fields: Vec<String>,
    /// 🏷️ Type the documents were indexed under.
    pub document_type: String,
}

#[derive(Debug)]
pub struct DocumentIdLookup<S: DocumentStore> {
    config: LookupConfig,
    store: Arc<S>,
}

impl<S: DocumentStore> DocumentIdLookup<S> {
    pub fn new(config: LookupConfig, store: Arc<S>) -> Self {
        Self { config, store }
    }

    /// 🏷️ Names of the output columns, which are just the configured fields.
    pub fn output_columns(&self) -> &[String] {
        &self.config.fields
    }

    pub async fn transform(&self, row: &Row) -> Result<Vec<Option<String>>> {
        let mut result = vec![None; self.config.fields.len()];

        let id = match row.get(&self.config.id_column).and_then(value_to_string) {
            Some(id) if !id.is_empty() => id,
            _ => return Ok(result),
        };
        debug!("🔎 Looking up document '{}'", id);

        let document = self
            .store
            .get_document(&self.config.document_type, &id, &self.config.fields)
            .await
            .context(format!("💀 Looking up document '{id}' failed."))?;
        let Some(document) = document else {
            return Ok(result);
        };

        for (slot, field) in result.iter_mut().zip(&self.config.fields) {
            match document.source.get(field) {
                Some(value) => *slot = value_to_string(value),
                None => info!("Document with id '{}' did not have the field '{}'", id, field),
            }
        }
        Ok(result)
    }

    pub async fn close(self) -> Result<()> {
        self.store.close().await
    }
}
