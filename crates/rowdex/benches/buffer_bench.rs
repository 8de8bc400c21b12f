//! 🧪 How expensive is a row on its way to a bulk request?
//!
//! `field_map` measures the coalescing Record → source conversion alone.
//! `buffer_to_memory` pushes whole batches through the buffer into the in-memory store.

use std::sync::Arc;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use rowdex::backends::InMemoryStore;
use rowdex::buffer::WriteBuffer;
use rowdex::common::Record;
use rowdex::flush::BulkFlushAction;
use serde_json::json;

fn record(i: usize) -> Record {
    Record::new(
        format!("id_{i}"),
        vec![json!(format!("first{i}")), json!(format!("last{i}")), json!(i)],
    )
}

fn fields() -> Vec<String> {
    vec!["name".to_string(), "name".to_string(), "age".to_string()]
}

fn field_map_benchmark(c: &mut Criterion) {
    let record = record(42);
    let fields = fields();
    c.bench_function("field_map", |b| {
        b.iter(|| record.to_field_map(&fields).expect("fields line up"))
    });
}

fn buffer_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let records: Vec<Record> = (0..2_000).map(record).collect();

    c.bench_function("buffer_to_memory_2000_rows_bulk_500", |b| {
        b.to_async(&runtime).iter_batched(
            || records.clone(),
            |records| async move {
                let store = Arc::new(InMemoryStore::new());
                let action = BulkFlushAction::new(store, fields(), "person");
                let mut buffer = WriteBuffer::new(500, action).expect("capacity is positive");
                for record in records {
                    buffer.add(record).await.expect("in-memory flush");
                }
                buffer.drain().await.expect("in-memory drain");
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, field_map_benchmark, buffer_benchmark);
criterion_main!(benches);
