//! Benchmarks for rule resolution, the hot path of every scan.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use treeprep::config::default_config;
use treeprep::rules::RuleTable;

fn bench_resolve(c: &mut Criterion) {
    let table = RuleTable::build(&default_config()).expect("default rules build");

    c.bench_function("resolve_preprocessed", |b| {
        b.iter(|| table.resolve(black_box("assets/js/app.js")))
    });

    c.bench_function("resolve_skip_preprocessing", |b| {
        b.iter(|| table.resolve(black_box("img/logo.png")))
    });

    c.bench_function("resolve_catch_all_only", |b| {
        b.iter(|| table.resolve(black_box("data/readings.bin")))
    });
}

fn bench_build_table(c: &mut Criterion) {
    let config = default_config();
    c.bench_function("build_rule_table", |b| {
        b.iter(|| RuleTable::build(black_box(&config)).expect("default rules build"))
    });
}

criterion_group!(benches, bench_resolve, bench_build_table);
criterion_main!(benches);
