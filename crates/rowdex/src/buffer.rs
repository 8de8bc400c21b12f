//! 🪣 The WriteBuffer: fill it up, flush it out, repeat until the rows run dry.
//!
//! 🎬 *[a bucket sits under a leaky faucet. drip. drip. drip. it is exactly 2000 drips tall.]*
//!
//! The buffer holds records until it reaches `capacity`, then hands the whole batch to a
//! [`FlushAction`] and starts over empty. At end of stream somebody calls [`WriteBuffer::drain`]
//! and whatever is left gets its own, smaller, equally dignified flush.
//!
//! 🧠 Knowledge graph:
//! - One producer at a time. `add` and `drain` take `&mut self`, so the borrow checker
//!   does the serialising for us. Want parallel producers? One buffer per producer.
//! - The flush is awaited in-line. No background task, no second flush in flight, ever.
//! - The buffer is swapped out *before* the flush runs. If the flush fails, that batch is gone
//!   from the buffer and the caller owns the consequences.
//! - The accepted-record counter is atomic so it can be read from anywhere once the dust settles.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, trace};

/// 🚽 The thing that happens to a full bucket.
///
/// Receives a non-empty batch in insertion order. Return `Ok(())` when the batch has landed,
/// an error otherwise. `&mut self` because flush actions are allowed to have state, like
/// a connection, or a grudge.
#[async_trait]
pub trait FlushAction<R: Send + 'static>: Send {
    async fn run(&mut self, batch: Vec<R>) -> Result<()>;
}

/// 🪣 A bounded, append-only buffer that flushes itself when full.
#[derive(Debug)]
pub struct WriteBuffer<R, F> {
    capacity: usize,
    records: Vec<R>,
    flush_action: F,
    // -- 📊 every record that made it through the door, flushed or not
    accepted: AtomicU64,
    flushes: u64,
}

impl<R, F> WriteBuffer<R, F>
where
    R: Send + 'static,
    F: FlushAction<R>,
{
    /// 🏗️ Build a buffer with room for `capacity` records.
    ///
    /// 💀 A capacity of zero is rejected. A bucket with no volume is just a ring.
    pub fn new(capacity: usize, flush_action: F) -> Result<Self> {
        if capacity == 0 {
            anyhow::bail!(
                "💀 WriteBuffer capacity must be at least 1. A zero-sized bucket would flush \
                 nothing forever, which is a very calm way to lose all your data."
            );
        }
        Ok(Self {
            capacity,
            records: Vec::with_capacity(capacity),
            flush_action,
            accepted: AtomicU64::new(0),
            flushes: 0,
        })
    }

    /// 📥 Append a record; flush the full batch if that filled the buffer.
    ///
    /// The record counts as accepted as soon as it is in the buffer, whatever the flush does next.
    pub async fn add(&mut self, record: R) -> Result<()> {
        self.records.push(record);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        trace!(
            "📥 buffered record {}/{}",
            self.records.len(),
            self.capacity
        );

        if self.records.len() >= self.capacity {
            self.flush()
                .await
                .context("💀 The buffer filled up, tried to flush, and the flush said no.")?;
        }
        Ok(())
    }

    /// 🏁 Flush whatever is left. A no-op on an empty buffer.
    pub async fn drain(&mut self) -> Result<()> {
        if self.records.is_empty() {
            debug!("🏁 drain called on an empty buffer. nothing to see here. move along.");
            return Ok(());
        }
        self.flush()
            .await
            .context("💀 The final drain of the buffer failed. So close to the finish line.")
    }

    async fn flush(&mut self) -> Result<()> {
        // -- 🔄 swap in a fresh Vec so the buffer is empty before the flush even starts
        let batch = std::mem::replace(&mut self.records, Vec::with_capacity(self.capacity));
        self.flushes += 1;
        debug!(
            "🚽 flushing batch #{} with {} records",
            self.flushes,
            batch.len()
        );
        self.flush_action.run(batch).await
    }

    /// 📊 Records accepted so far.
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// 📊 Flushes attempted so far, failed ones included.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// 🧪 Remembers every batch it was handed. Optionally fails on a chosen flush number.
    #[derive(Debug, Default, Clone)]
    struct RecordingFlush {
        batches: Arc<Mutex<Vec<Vec<&'static str>>>>,
        fail_on_flush: Option<usize>,
    }

    impl RecordingFlush {
        fn batches(&self) -> Vec<Vec<&'static str>> {
            self.batches.lock().expect("test mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl FlushAction<&'static str> for RecordingFlush {
        async fn run(&mut self, batch: Vec<&'static str>) -> Result<()> {
            let mut batches = self.batches.lock().expect("test mutex poisoned");
            batches.push(batch);
            if Some(batches.len()) == self.fail_on_flush {
                anyhow::bail!("scripted flush failure");
            }
            Ok(())
        }
    }

    #[test]
    fn the_one_where_a_zero_capacity_bucket_is_refused() {
        let result = WriteBuffer::<&'static str, _>::new(0, RecordingFlush::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn the_one_where_less_than_capacity_waits_for_drain() -> Result<()> {
        let flush = RecordingFlush::default();
        let mut buffer = WriteBuffer::new(10, flush.clone())?;
        for record in ["a", "b", "c"] {
            buffer.add(record).await?;
        }
        assert!(flush.batches().is_empty(), "no flush before capacity");
        assert_eq!(buffer.len(), 3);

        buffer.drain().await?;
        assert_eq!(flush.batches(), vec![vec!["a", "b", "c"]]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.accepted_count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_exact_multiples_flush_themselves() -> Result<()> {
        let flush = RecordingFlush::default();
        let mut buffer = WriteBuffer::new(3, flush.clone())?;
        for record in ["a", "b", "c", "d", "e", "f", "g", "h", "i"] {
            buffer.add(record).await?;
        }
        let batches = flush.batches();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 3));

        buffer.drain().await?;
        assert_eq!(flush.batches().len(), 3, "drain on an empty buffer is a no-op");
        assert_eq!(buffer.flush_count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_five_letters_meet_a_bucket_of_two() -> Result<()> {
        let flush = RecordingFlush::default();
        let mut buffer = WriteBuffer::new(2, flush.clone())?;
        for record in ["A", "B", "C", "D", "E"] {
            buffer.add(record).await?;
        }
        assert_eq!(flush.batches(), vec![vec!["A", "B"], vec!["C", "D"]]);

        buffer.drain().await?;
        assert_eq!(
            flush.batches(),
            vec![vec!["A", "B"], vec!["C", "D"], vec!["E"]]
        );
        assert_eq!(buffer.accepted_count(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_flush_still_empties_the_bucket() -> Result<()> {
        let flush = RecordingFlush {
            fail_on_flush: Some(1),
            ..Default::default()
        };
        let mut buffer = WriteBuffer::new(2, flush.clone())?;
        buffer.add("x").await?;
        let result = buffer.add("y").await;

        assert!(result.is_err(), "the flush failure must reach the caller");
        assert!(buffer.is_empty());
        assert_eq!(buffer.accepted_count(), 2);
        Ok(())
    }
}
