use benches::{chain_program, diamond_program, taint_rules};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_chain(c: &mut Criterion) {
    let rules = taint_rules();
    for depth in [8, 64] {
        let program = chain_program(depth);
        c.bench_function(&format!("analyze_chain_{depth}"), |b| {
            b.iter(|| engine::analyze(black_box(&program), black_box(&rules)))
        });
    }
}

fn bench_diamond(c: &mut Criterion) {
    let rules = taint_rules();
    for width in [16, 128] {
        let program = diamond_program(width);
        c.bench_function(&format!("analyze_diamond_{width}"), |b| {
            b.iter(|| engine::analyze(black_box(&program), black_box(&rules)))
        });
    }
}

criterion_group!(benches, bench_chain, bench_diamond);
criterion_main!(benches);
