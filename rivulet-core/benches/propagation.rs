//! Propagation benchmarks for the value graph.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use rivulet_core::{batch, tick, Atom, Batched, Computed};

// =============================================================================
// Graph Construction
// =============================================================================

/// A chain `atom -> c1 -> c2 -> ... -> cN`.
fn computed_chain(len: usize) -> (Atom<u64>, Computed<u64>) {
    let source = Atom::new(0_u64);
    let mut tail = Computed::new((source.clone(),), |(v,)| v + 1);
    for _ in 1..len {
        tail = Computed::new((tail.clone(),), |(v,)| v + 1);
    }
    (source, tail)
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_atom_write(c: &mut Criterion) {
    let atom = Atom::new(0_u64);
    let _sub = atom.listen(|value, _| {
        black_box(value);
    });

    let mut next = 0_u64;
    c.bench_function("atom_write_one_listener", |b| {
        b.iter(|| {
            next += 1;
            atom.set(black_box(next));
        });
    });
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed_chain");

    for len in [1_usize, 10, 100] {
        group.bench_with_input(BenchmarkId::new("observed", len), &len, |b, &len| {
            let (source, tail) = computed_chain(len);
            let _sub = tail.listen(|value, _| {
                black_box(value);
            });
            let mut next = 0_u64;
            b.iter(|| {
                next += 1;
                source.set(next);
            });
        });

        group.bench_with_input(BenchmarkId::new("pull", len), &len, |b, &len| {
            let (source, tail) = computed_chain(len);
            let mut next = 0_u64;
            b.iter(|| {
                next += 1;
                source.set(next);
                black_box(tail.get())
            });
        });
    }

    group.finish();
}

fn bench_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_in");

    for width in [4_usize, 64] {
        let atoms: Vec<Atom<u64>> = (0..width as u64).map(Atom::new).collect();

        group.bench_with_input(BenchmarkId::new("batched_transaction", width), &atoms, |b, atoms| {
            let sum = Computed::new(atoms.clone(), |values: Vec<u64>| values.iter().sum::<u64>());
            let _sub = sum.listen(|value, _| {
                black_box(value);
            });
            b.iter(|| {
                batch(|| {
                    for atom in atoms {
                        atom.update(|v| v + 1);
                    }
                });
            });
        });

        group.bench_with_input(BenchmarkId::new("batched_store_tick", width), &atoms, |b, atoms| {
            let sum = Batched::new(atoms.clone(), |values: Vec<u64>| values.iter().sum::<u64>());
            let _sub = sum.listen(|value, _| {
                black_box(value);
            });
            b.iter(|| {
                for atom in atoms {
                    atom.update(|v| v + 1);
                }
                black_box(tick())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_atom_write, bench_chain, bench_fan_in);
criterion_main!(benches);
