//! 📊 progress.rs: how far through the input are we, and how did it go.
//!
//! Two jobs. [`ProgressMetrics`] drives an indicatif bar while rows stream in.
//! [`summary_table`] renders the final [`WriteDataResult`] with comfy-table once it's all over.

use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::common::WriteDataResult;

const MIB: f64 = 1024.0 * 1024.0;

/// 🔢 "1234567" → "1,234,567".
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// ⏱️ MM:SS, or HH:MM:SS once it's been a while.
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs / 3600 {
        0 => format!("{:02}:{:02}", secs / 60, secs % 60),
        hours => format!("{:02}:{:02}:{:02}", hours, (secs % 3600) / 60, secs % 60),
    }
}

/// 📊 Progress over an input file, measured in bytes read and rows seen.
pub struct ProgressMetrics {
    source_name: String,
    total_size: u64,
    bytes_read: u64,
    rows_read: u64,
    progress_bar: ProgressBar,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- ProgressBar has no Debug
        f.debug_struct("ProgressMetrics")
            .field("source_name", &self.source_name)
            .field("total_size", &self.total_size)
            .field("bytes_read", &self.bytes_read)
            .field("rows_read", &self.rows_read)
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 `total_size` of 0 means unknown.
    /// `visible = false` keeps the terminal quiet, for tests and CI dry runs.
    pub fn new(source_name: impl Into<String>, total_size: u64, visible: bool) -> Self {
        let progress_bar = if visible {
            ProgressBar::new(total_size)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}] {percent}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);

        Self {
            source_name: source_name.into(),
            total_size,
            bytes_read: 0,
            rows_read: 0,
            progress_bar,
            start_time: Instant::now(),
        }
    }

    /// 📏 Set the expected total once it's known, e.g. after the input file is opened.
    pub fn set_total_size(&mut self, total_size: u64) {
        self.total_size = total_size;
        self.progress_bar.set_length(total_size);
    }

    /// 🔄 Account for one more chunk of input.
    pub fn update(&mut self, bytes: u64, rows: u64) {
        self.bytes_read += bytes;
        self.rows_read += rows;
        self.progress_bar.set_position(self.bytes_read);
        self.progress_bar.set_message(self.message());
    }

    pub fn finish(&self) {
        self.progress_bar.finish_with_message(self.message());
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn rows_per_sec(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.rows_read as f64 / secs
        } else {
            0.0
        }
    }

    fn message(&self) -> String {
        format!(
            "| source: {} | {} rows ({:.0}/s) | {:.2} MiB | {}",
            self.source_name,
            format_number(self.rows_read),
            self.rows_per_sec(),
            self.bytes_read as f64 / MIB,
            format_duration(self.elapsed())
        )
    }
}

/// 📋 The end-of-run report.
pub fn summary_table(result: &WriteDataResult, elapsed: Duration) -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let rows = [
        ("written", format_number(result.written)),
        ("skipped", format_number(result.skipped)),
        ("errors", format_number(result.errors)),
        ("bulk requests", format_number(result.flushes)),
        ("elapsed", format_duration(elapsed)),
    ];
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
