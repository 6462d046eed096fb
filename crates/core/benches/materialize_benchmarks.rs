use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use bqjob_core::{coerce, materialize_row, Field, RawRow, Schema};
use serde_json::Value as JsonValue;

fn billing_schema() -> Schema {
    Schema::new(vec![
        Field::new("date", "STRING"),
        Field::new("charge", "FLOAT"),
        Field::new("units", "INTEGER"),
        Field::new("refunded", "BOOLEAN"),
        Field::new("billed_at", "TIMESTAMP"),
    ])
}

fn billing_rows(count: usize) -> Vec<RawRow> {
    (0..count)
        .map(|i| {
            vec![
                JsonValue::String("2012-06-21".to_string()),
                JsonValue::String(format!("{}.25", i)),
                JsonValue::String(i.to_string()),
                JsonValue::String(if i % 2 == 0 { "true" } else { "false" }.to_string()),
                JsonValue::String(format!("{}.5", 1_340_236_800 + i)),
            ]
        })
        .collect()
}

fn bench_scalar_coercion(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_coercion");

    let cases = [
        ("STRING", "hello"),
        ("INTEGER", "1234"),
        ("FLOAT", "0.123"),
        ("BOOLEAN", "True"),
        ("TIMESTAMP", "1340236800.25"),
    ];
    for (field_type, raw) in cases {
        let raw = JsonValue::String(raw.to_string());
        group.bench_function(BenchmarkId::new("coerce", field_type), |b| {
            b.iter(|| coerce(black_box(field_type), black_box(&raw)))
        });
    }

    group.finish();
}

fn bench_row_materialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_materialization");
    let schema = billing_schema();

    for row_count in [10, 100, 1000, 10000].iter() {
        let rows = billing_rows(*row_count);
        group.throughput(Throughput::Elements(*row_count as u64));
        group.bench_with_input(
            BenchmarkId::new("materialize_rows", row_count),
            &rows,
            |b, rows| {
                b.iter(|| {
                    for row in rows {
                        black_box(materialize_row(&schema, row).ok());
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_scalar_coercion, bench_row_materialization);
criterion_main!(benches);
