pub mod app_config;
pub mod backends;
pub mod buffer;
pub mod common;
pub mod flush;
pub mod indexer;
pub mod lookup;
pub mod progress;
pub mod search;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, trace, warn};

use crate::app_config::{AppConfig, InputConfig};
use crate::backends::{DocumentStore, StoreBackend};
use crate::common::{Row, WriteDataResult};
use crate::indexer::{IndexerConfig, RowIndexer};
use crate::progress::ProgressMetrics;

/// 🚀 Connect the configured store and index the input file into it.
pub async fn run(app_config: AppConfig) -> Result<WriteDataResult> {
    let store = StoreBackend::from_config(&app_config.store)
        .await
        .context("💀 Could not connect to the configured store.")?;
    index_file(&app_config.input, app_config.indexer, Arc::new(store)).await
}

/// 📥 Stream the input file through a [`RowIndexer`] into `store`.
///
/// One JSON object per line. Blank lines are skipped, anything else that isn't an object
/// fails the run and names the line. The store is closed on every way out, and the first
/// error wins.
pub async fn index_file<S: DocumentStore + 'static>(
    input: &InputConfig,
    indexer_config: IndexerConfig,
    store: Arc<S>,
) -> Result<WriteDataResult> {
    let mut indexer = match RowIndexer::open(indexer_config, Arc::clone(&store)).await {
        Ok(indexer) => indexer,
        Err(err) => {
            if let Err(close_err) = store.close().await {
                warn!("⚠️ Closing the store after a failed open also failed: {:#}", close_err);
            }
            return Err(err);
        }
    };

    let input_path = input.file_name.as_path();
    let mut progress = ProgressMetrics::new(input_path.display().to_string(), 0, true);
    let finished = match stream_rows(input_path, &mut indexer, &mut progress).await {
        Ok(()) => indexer.finish().await,
        Err(err) => Err(err),
    };
    progress.finish();
    let closed = indexer.close().await;

    match (finished, closed) {
        (Ok(result), Ok(())) => {
            info!(
                "✅ Done: {} written, {} skipped, {} bulk requests in {:?}",
                result.written,
                result.skipped,
                result.flushes,
                progress.elapsed()
            );
            Ok(result)
        }
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!("⚠️ Closing the store after a failed run also failed: {:#}", close_err);
            Err(err)
        }
    }
}

async fn stream_rows<S: DocumentStore + 'static>(
    input_path: &Path,
    indexer: &mut RowIndexer<S>,
    progress: &mut ProgressMetrics,
) -> Result<()> {
    let file = tokio::fs::File::open(input_path)
        .await
        .context(format!("💀 Could not open input file '{}'.", input_path.display()))?;
    progress.set_total_size(file.metadata().await.map(|m| m.len()).unwrap_or(0));

    let mut lines = BufReader::new(file).lines();
    let mut line_number = 0u64;
    while let Some(line) = lines
        .next_line()
        .await
        .context("💀 Reading the input file failed midway.")?
    {
        line_number += 1;
        let bytes = line.len() as u64 + 1;
        if line.trim().is_empty() {
            progress.update(bytes, 0);
            continue;
        }

        let row: Row = serde_json::from_str(&line).context(format!(
            "💀 Line {} of '{}' is not a JSON object.",
            line_number,
            input_path.display()
        ))?;
        trace!("📥 line {}: {:?}", line_number, row);
        indexer.run(&row).await?;
        progress.update(bytes, 1);
    }
    Ok(())
}
