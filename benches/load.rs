use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use loqusdb::db::memory::MemoryDb;
use loqusdb::load::{ConfigBuilder, LoadOrchestrator, Sources};
use loqusdb::observe::model::{Genotype, SvType, VariantCall};
use loqusdb::ped::resolve;

fn calls(case_idx: u32) -> Vec<VariantCall> {
    let bases = ["A", "C", "G", "T"];
    let mut result = (1..=5_000u32)
        .map(|i| {
            VariantCall::short("1", i * 100 + case_idx % 7, "N", bases[(i % 4) as usize])
                .with_genotype("s1", Genotype::Het, Some(40))
        })
        .collect::<Vec<_>>();
    result.extend((1..=500u32).map(|i| {
        VariantCall::structural("2", i * 10_000 + case_idx * 13, i * 10_000 + 5_000, SvType::Del)
            .with_genotype("s1", Genotype::Het, Some(40))
    }));
    result
}

fn load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");
    group.sample_size(20);

    let config = ConfigBuilder::default().max_window(100).build().unwrap();
    let cases = (0..10u32)
        .map(|idx| {
            let case_id = format!("case{}", idx);
            let case = resolve(None, Some(case_id.as_str()), &["s1".to_string()]).unwrap();
            (case, calls(idx))
        })
        .collect::<Vec<_>>();

    group.bench_function("ten cases", |b| {
        b.iter_batched(
            MemoryDb::new,
            |db| {
                let orchestrator = LoadOrchestrator::new(&db, &db, config.clone());
                for (case, calls) in &cases {
                    orchestrator
                        .load(case, &Sources::default(), calls.iter().cloned().map(Ok), None)
                        .unwrap();
                }
                db
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, load);
criterion_main!(benches);
