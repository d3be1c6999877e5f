use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;

use hllpp::{Builder, Hasher64, HyperLogLogPlus};

// Skips the cryptographic hash so the benches measure the sketch.
struct PassThroughHasher;

impl Hasher64 for PassThroughHasher {
    fn output_len(&self) -> usize {
        8
    }

    fn sum64(&mut self, data: &[u8]) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&data[..8]);
        u64::from_be_bytes(word)
    }
}

fn generate_words(count: usize) -> Vec<[u8; 8]> {
    let mut rng = rand::thread_rng();

    let mut workload: Vec<[u8; 8]> = (0..count).map(|_| rng.gen::<u64>().to_be_bytes()).collect();

    workload.shuffle(&mut rng);

    workload
}

fn bench_add(c: &mut Criterion) {
    let workload = generate_words(2000);

    for &precision in &[8u8, 14, 16] {
        c.bench_function(&format!("hllpp_add_p{}", precision), |b| {
            b.iter(|| {
                let mut sketch = Builder::new()
                    .precision(precision)
                    .hasher(PassThroughHasher)
                    .build()
                    .unwrap();

                for val in &workload {
                    sketch.add(val);
                }
            })
        });
    }

    c.bench_function("hllpp_add_sha1_p14", |b| {
        b.iter(|| {
            let mut sketch = HyperLogLogPlus::new();

            for val in &workload {
                sketch.add(val);
            }
        })
    });
}

fn bench_count(c: &mut Criterion) {
    for &(precision, count) in &[(8u8, 200usize), (8, 20_000), (14, 10_000), (14, 100_000)] {
        let workload = generate_words(count);

        let mut sketch = Builder::new()
            .precision(precision)
            .hasher(PassThroughHasher)
            .build()
            .unwrap();

        for val in &workload {
            sketch.add(val);
        }

        c.bench_function(&format!("hllpp_count_p{}_n{}", precision, count), |b| {
            b.iter(|| {
                let val = sketch.count();
                black_box(val);
            })
        });
    }
}

criterion_group!(benches, bench_add, bench_count);

criterion_main!(benches);
