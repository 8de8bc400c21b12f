//! 📦 Common data structures: rows come in, records go into the buffer, documents go out.
//!
//! 🎬 COLD OPEN: INT. ROW PIPELINE. 2:13 AM.
//!
//! A row arrives. It has columns. Some of them are null. One of them claims to be an ID.
//! The indexer squints at it and asks the only question that matters: "who are you?"
//! If the row can't answer, it gets a warning and a polite escort to the exit.
//! If it can, it becomes a [`Record`], and a [`Record`] becomes a document at flush time.
//!
//! 🦆 The duck is here because every file must have one.

use std::collections::HashSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 🚰 One input row, keyed by column name.
///
/// This is what the row-processing driver hands us. Columns are looked up by name;
/// a column that isn't there reads as null. No schema, no drama.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    columns: Map<String, Value>,
}

impl Row {
    pub fn new(columns: Map<String, Value>) -> Self {
        Self { columns }
    }

    /// 🔧 Builder-ish helper, mostly so tests read like a sentence.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// 🔍 The value of `column`, or `None` when it is missing or null.
    /// Missing and null are the same thing here. The cluster can't tell the difference either.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column).filter(|v| !v.is_null())
    }
}

/// 🎯 A validated record waiting in the buffer: an identifier plus positional values.
///
/// `values[i]` belongs to the field name at `fields[i]` of whoever flushes it.
/// Nulls are kept in place so positions stay honest; they are dropped at field-map time.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            values,
        }
    }

    /// 🗺️ Group this record's non-null values under their field names.
    ///
    /// When two columns map to the same field name, the values are coalesced into a JSON
    /// array in column order instead of the second one stomping on the first. A third
    /// column for the same field is appended to that same array.
    ///
    /// 💀 Bails if `fields` and `values` disagree on length. That's a wiring bug, not a data bug.
    pub fn to_field_map(&self, fields: &[String]) -> Result<Map<String, Value>> {
        if fields.len() != self.values.len() {
            anyhow::bail!(
                "💀 Record '{}' carries {} values but {} field names were configured. \
                 Somebody counted the columns on their fingers and lost a finger.",
                self.id,
                self.values.len(),
                fields.len()
            );
        }

        let mut map = Map::new();
        // -- 🔒 fields we turned into arrays ourselves; an array that arrived as a value stays a value
        let mut coalesced: HashSet<&str> = HashSet::new();

        for (field, value) in fields.iter().zip(&self.values) {
            if value.is_null() {
                continue;
            }
            match map.get_mut(field.as_str()) {
                None => {
                    map.insert(field.clone(), value.clone());
                }
                Some(Value::Array(items)) if coalesced.contains(field.as_str()) => {
                    items.push(value.clone());
                }
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value.clone()]);
                    coalesced.insert(field.as_str());
                }
            }
        }

        Ok(map)
    }
}

/// 🔄 Render a column value as a string, the way an identifier wants to be rendered.
///
/// Strings pass through untouched (no surrounding quotes), numbers and booleans use their
/// display form, arrays and objects become compact JSON. Null is `None`.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// 📊 What the indexer reports when the stream is over.
///
/// `updated` and `errors` are always zero: index operations overwrite, and a failed flush
/// fails the whole run instead of being tallied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteDataResult {
    pub written: u64,
    pub updated: u64,
    pub errors: u64,
    pub skipped: u64,
    pub flushes: u64,
}
