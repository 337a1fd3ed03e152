/*
Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gotkv::boundary::BoundaryHasher;
use gotkv::sync::{sync, SyncOptions};
use gotkv::{InMemoryStore, Operator, Root, Span, TreeConfig};
use std::sync::Arc;

fn generate_test_data(size: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..size)
        .map(|i| {
            (
                format!("key_{:06}", i).into_bytes(),
                format!("value_{:06}", i).into_bytes(),
            )
        })
        .collect()
}

fn config() -> TreeConfig {
    TreeConfig::new(1024, 64 * 1024)
}

fn build(op: &Operator<Arc<InMemoryStore>>, data: &[(Vec<u8>, Vec<u8>)]) -> Root {
    op.build(data.iter().map(|(k, v)| (k, v))).unwrap()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(10);

    for &size in &[1000, 10000, 100000] {
        let data = generate_test_data(size);
        for hasher in [BoundaryHasher::SipHash24, BoundaryHasher::XxHash64] {
            group.bench_with_input(format!("build_{:?}_{}", hasher, size), &size, |b, _| {
                b.iter(|| {
                    let op = Operator::new(
                        Arc::new(InMemoryStore::default()),
                        config().with_hasher(hasher),
                    )
                    .unwrap();
                    black_box(build(&op, &data));
                });
            });
        }
    }

    group.finish();
}

fn bench_put_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_single");
    group.sample_size(10);

    for &size in &[1000, 10000, 100000] {
        let data = generate_test_data(size);
        let op = Operator::new(Arc::new(InMemoryStore::default()), config()).unwrap();
        let root = build(&op, &data);

        group.bench_with_input(format!("put_single_{}", size), &size, |b, _| {
            b.iter(|| {
                black_box(op.put(&root, b"key_000500x", b"inserted").unwrap());
            });
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.sample_size(10);

    for &size in &[1000, 10000, 100000] {
        let data = generate_test_data(size);
        let op = Operator::new(Arc::new(InMemoryStore::default()), config()).unwrap();
        let root = build(&op, &data);

        group.bench_with_input(format!("get_{}", size), &size, |b, _| {
            b.iter(|| {
                for (key, _) in data.iter().step_by(97) {
                    black_box(op.get(&root, key).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");
    group.sample_size(10);

    for &size in &[1000, 10000, 100000] {
        let data = generate_test_data(size);
        let op = Operator::new(Arc::new(InMemoryStore::default()), config()).unwrap();
        let root = build(&op, &data);

        group.bench_with_input(format!("iterate_{}", size), &size, |b, _| {
            b.iter(|| {
                black_box(op.count(&root, Span::total()).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    group.sample_size(10);

    for &size in &[1000, 10000, 100000] {
        let data = generate_test_data(size);
        let op = Operator::new(Arc::new(InMemoryStore::default()), config()).unwrap();
        let left = build(&op, &data);
        let right = op.put(&left, &data[size / 2].0, b"changed").unwrap();

        group.bench_with_input(format!("diff_one_change_{}", size), &size, |b, _| {
            b.iter(|| {
                black_box(op.diff(&left, &right, Span::total()).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");
    group.sample_size(10);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for &size in &[1000, 10000] {
        let data = generate_test_data(size);
        let src = Arc::new(InMemoryStore::default());
        let op = Operator::new(src.clone(), config()).unwrap();
        let root = build(&op, &data);

        group.bench_with_input(format!("sync_{}", size), &size, |b, _| {
            b.iter(|| {
                let dst = Arc::new(InMemoryStore::default());
                runtime
                    .block_on(sync(
                        dst,
                        src.clone(),
                        &root,
                        &SyncOptions::default(),
                        |_| Ok(()),
                    ))
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_build,
    bench_put_single,
    bench_get,
    bench_iterate,
    bench_diff,
    bench_sync
);
criterion_main!(benches);
