use criterion::{criterion_group, criterion_main, Criterion};

use cityforge::{generate, CityConfig};

fn bench_generation(c: &mut Criterion) {
    let config = CityConfig {
        map_size: 60,
        max_major_roads: 150,
        max_minor_roads: 600,
        seed: 7,
        ..Default::default()
    };

    c.bench_function("generate_small_city", |b| {
        b.iter(|| generate(&config).expect("generation succeeds"))
    });
}

criterion_group!(benches, bench_generation);
criterion_main!(benches);
