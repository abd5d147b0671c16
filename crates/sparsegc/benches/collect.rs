//! Benchmark: allocation churn and collection pause time.

use criterion::{criterion_group, criterion_main, Criterion};
use sparsegc::{GcContext, GcRef, Trace};
use std::cell::Cell;
use std::hint::black_box;

#[derive(Trace)]
struct Node {
    value: i64,
    next: Cell<Option<GcRef<Node>>>,
}

impl Node {
    fn new(value: i64) -> Self {
        Self {
            value,
            next: Cell::new(None),
        }
    }
}

fn bench_unrooted_churn(c: &mut Criterion) {
    c.bench_function("churn_1000_unrooted", |b| {
        b.iter(|| {
            let gc = GcContext::new();
            for i in 0..1000 {
                drop(gc.alloc(Node::new(i)).unwrap());
            }
            gc.collect();
            black_box(gc.live_objects());
        });
    });
}

fn bench_collect_chain(c: &mut Criterion) {
    c.bench_function("collect_chain_10000", |b| {
        b.iter(|| {
            let gc = GcContext::new();
            let head = gc.alloc(Node::new(0)).unwrap();
            let mut tail = head.as_gc();
            for i in 1..10_000 {
                let next = gc.alloc(Node::new(i)).unwrap();
                tail.next.set(Some(next.as_gc()));
                tail = next.as_gc();
            }
            gc.collect();
            black_box(&head);
        });
    });
}

fn bench_rooted_survivors(c: &mut Criterion) {
    c.bench_function("collect_1000_rooted", |b| {
        b.iter(|| {
            let gc = GcContext::new();
            let roots: Vec<_> = (0..1000)
                .map(|i| gc.alloc(Node::new(i)).unwrap())
                .collect();
            gc.collect();
            black_box(roots.len());
        });
    });
}

criterion_group!(
    benches,
    bench_unrooted_churn,
    bench_collect_chain,
    bench_rooted_survivors
);
criterion_main!(benches);
