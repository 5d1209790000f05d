use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use aptitude_core::aggregate::IndexAggregator;
use aptitude_core::catalog::{AptitudeCatalog, PercentileBand};
use aptitude_core::model::RawResult;
use aptitude_core::scoring::{validate_consistency, ScoreProcessor};

const CODES: [&str; 8] = ["V", "E", "A", "CON", "R", "N", "M", "O"];

fn make_results(subjects: usize) -> Vec<RawResult> {
    (0..subjects)
        .flat_map(|s| {
            CODES.iter().enumerate().map(move |(i, code)| {
                RawResult::new(&format!("s{s}"), code)
                    .with_raw_score(10 + i as i64)
                    .with_counts(10 + i as i64, 4, 1)
                    .with_elapsed(300.0)
                    .with_percentile(((s * 7 + i * 13) % 101) as f64)
            })
        })
        .collect()
}

fn bench_percentile_band(c: &mut Criterion) {
    c.bench_function("percentile_band_sweep", |b| {
        b.iter(|| {
            (0..=100)
                .filter_map(|p| PercentileBand::from_percentile(black_box(p as f64)))
                .count()
        })
    });
}

fn bench_process_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_many");
    let processor = ScoreProcessor::new(Arc::new(AptitudeCatalog::default()));

    for subjects in [1, 100] {
        let raws = make_results(subjects);
        group.bench_function(format!("subjects={subjects}"), |b| {
            b.iter(|| processor.process_many(black_box(&raws)))
        });
    }

    group.finish();
}

fn bench_summarize(c: &mut Criterion) {
    let mut group = c.benchmark_group("summarize");
    let catalog = Arc::new(AptitudeCatalog::default());
    let processor = ScoreProcessor::new(Arc::clone(&catalog));
    let aggregator = IndexAggregator::new(catalog);
    let batch = processor.process_many(&make_results(1));

    group.bench_function("full_battery", |b| {
        b.iter(|| aggregator.summarize(black_box("s0"), black_box(&batch.valid_results)))
    });

    group.bench_function("consistency", |b| {
        b.iter(|| validate_consistency(black_box(&batch.valid_results)))
    });

    group.finish();
}

criterion_group!(benches, bench_percentile_band, bench_process_many, bench_summarize);
criterion_main!(benches);
